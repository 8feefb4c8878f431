use ragchat_store::{
    BoxFuture, ChatId, DecodeSnafu, Message, NotFoundSnafu, RequestSnafu, Session, SessionId,
    SessionStore, StatusSnafu, StoreResult, sort_sessions_by_recent,
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::client::ApiClient;

/// Backends answer either with the bare value or wrapped in a `data` envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum Payload<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Payload<T> {
    fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } => data,
            Self::Bare(value) => value,
        }
    }
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    title: &'a str,
}

/// Identifies the entity a request targets so a 404 can name it.
struct Target<'a> {
    entity: &'static str,
    id: &'a str,
}

impl ApiClient {
    async fn send_checked(
        request: reqwest::RequestBuilder,
        stage: &'static str,
        target: Target<'_>,
    ) -> StoreResult<Response> {
        let response = request
            .send()
            .await
            .boxed()
            .context(RequestSnafu { stage })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return NotFoundSnafu {
                stage,
                entity: target.entity,
                id: target.id,
            }
            .fail();
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(stage, status = status.as_u16(), "backend rejected request");
            return StatusSnafu {
                stage,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        stage: &'static str,
    ) -> StoreResult<T> {
        let body = response
            .bytes()
            .await
            .boxed()
            .context(RequestSnafu { stage })?;

        serde_json::from_slice::<Payload<T>>(&body)
            .map(Payload::into_inner)
            .boxed()
            .context(DecodeSnafu { stage })
    }
}

impl SessionStore for ApiClient {
    fn list_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, StoreResult<Vec<Message>>> {
        Box::pin(async move {
            let url = self.endpoint(&["sessions", session_id.as_str(), "messages"]);
            let response = Self::send_checked(
                self.get(url),
                "api-list-messages",
                Target {
                    entity: "session",
                    id: session_id.as_str(),
                },
            )
            .await?;
            Self::read_json(response, "api-list-messages-decode").await
        })
    }

    fn list_sessions<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, StoreResult<Vec<Session>>> {
        Box::pin(async move {
            let url = self.endpoint(&["chats", chat_id.as_str(), "sessions"]);
            let response = Self::send_checked(
                self.get(url),
                "api-list-sessions",
                Target {
                    entity: "chat",
                    id: chat_id.as_str(),
                },
            )
            .await?;
            let mut sessions: Vec<Session> =
                Self::read_json(response, "api-list-sessions-decode").await?;
            sort_sessions_by_recent(&mut sessions);
            Ok(sessions)
        })
    }

    fn create_session<'a>(
        &'a self,
        chat_id: &'a ChatId,
        title: &'a str,
    ) -> BoxFuture<'a, StoreResult<Session>> {
        Box::pin(async move {
            let url = self.endpoint(&["chats", chat_id.as_str(), "sessions"]);
            let request = self
                .post(url)
                .timeout(self.request_timeout())
                .json(&CreateSessionBody {
                    title: title.trim(),
                });
            let response = Self::send_checked(
                request,
                "api-create-session",
                Target {
                    entity: "chat",
                    id: chat_id.as_str(),
                },
            )
            .await?;
            let session: Session = Self::read_json(response, "api-create-session-decode").await?;
            tracing::info!(chat_id = %chat_id, session_id = %session.id, "created session");
            Ok(session)
        })
    }

    fn delete_session<'a>(&'a self, session_id: &'a SessionId) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&["sessions", session_id.as_str()]);
            Self::send_checked(
                self.delete(url),
                "api-delete-session",
                Target {
                    entity: "session",
                    id: session_id.as_str(),
                },
            )
            .await?;
            tracing::info!(session_id = %session_id, "deleted session");
            Ok(())
        })
    }
}
