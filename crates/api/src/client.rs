use std::time::Duration;

use reqwest::{RequestBuilder, Url};
use snafu::{ResultExt, ensure};

use super::error::{ApiResult, BuildClientSnafu, InvalidBaseUrlSnafu};

/// Header carrying the tenant every request is scoped to.
pub const TENANT_HEADER: &str = "X-Tenant-Id";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub tenant_id: Option<String>,
    /// Bounds plain request/response calls. Streamed bodies are bounded per chunk by the caller.
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            api_token: None,
            tenant_id: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = non_blank(token.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = non_blank(tenant_id.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> ApiResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|source| {
            InvalidBaseUrlSnafu {
                stage: "api-client-parse-base-url",
                base_url: config.base_url.clone(),
                details: source.to_string(),
            }
            .build()
        })?;
        ensure!(
            !base_url.cannot_be_a_base(),
            InvalidBaseUrlSnafu {
                stage: "api-client-check-base-url",
                base_url: config.base_url.clone(),
                details: "url cannot carry path segments",
            }
        );

        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "api-client-build",
            })?;

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejected cannot-be-a-base urls, so segments are always appendable.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn get(&self, url: Url) -> RequestBuilder {
        self.authorized(self.http.get(url))
            .timeout(self.config.request_timeout)
    }

    pub(crate) fn post(&self, url: Url) -> RequestBuilder {
        self.authorized(self.http.post(url))
    }

    pub(crate) fn delete(&self, url: Url) -> RequestBuilder {
        self.authorized(self.http.delete(url))
            .timeout(self.config.request_timeout)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = match &self.config.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        match &self.config.tenant_id {
            Some(tenant_id) => builder.header(TENANT_HEADER, tenant_id),
            None => builder,
        }
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_encoded_segments_to_base_path() {
        let client = ApiClient::new(ApiConfig::new("https://api.example.com/v1/")).unwrap();
        let url = client.endpoint(&["chats", "support bot", "sessions"]);
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/chats/support%20bot/sessions"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(ApiClient::new(ApiConfig::new("not a url")).is_err());
        assert!(ApiClient::new(ApiConfig::new("mailto:ops@example.com")).is_err());
    }

    #[test]
    fn blank_credentials_are_dropped() {
        let config = ApiConfig::new(" http://localhost:8080 ")
            .with_token("  ")
            .with_tenant("acme");
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.api_token, None);
        assert_eq!(config.tenant_id.as_deref(), Some("acme"));
    }
}
