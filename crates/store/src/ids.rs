use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ensure;

use super::error::{InvalidIdSnafu, StoreError, StoreResult};

/// Prefix of client-minted ids for optimistic messages the server has not confirmed.
pub const TRANSIENT_MESSAGE_PREFIX: &str = "temp-user-";

// Backend ids are opaque strings; every wrapper shares one shape so call sites stay uniform.
macro_rules! define_store_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw id without validation. Use [`Self::parse`] for user input.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn parse(raw: &str) -> StoreResult<Self> {
                let trimmed = raw.trim();
                ensure!(
                    !trimmed.is_empty(),
                    InvalidIdSnafu {
                        stage: "parse-store-id",
                        id_type: $id_type,
                        raw: raw.to_string(),
                    }
                );
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = StoreError;

            fn from_str(raw: &str) -> StoreResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_store_id!(ChatId, "chat-id");
define_store_id!(SessionId, "session-id");
define_store_id!(MessageId, "message-id");

impl MessageId {
    /// Mints the id of an optimistic user message, `temp-user-<millis>`.
    pub fn transient(unix_millis: i64) -> Self {
        Self(format!("{TRANSIENT_MESSAGE_PREFIX}{unix_millis}"))
    }

    pub fn is_transient(&self) -> bool {
        self.0.starts_with(TRANSIENT_MESSAGE_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_rejects_blank_ids() {
        assert_eq!(SessionId::parse("  s1 ").unwrap().as_str(), "s1");
        assert!(matches!(
            SessionId::parse("   "),
            Err(StoreError::InvalidId {
                id_type: "session-id",
                ..
            })
        ));
    }

    #[test]
    fn transient_ids_are_recognised() {
        let id = MessageId::transient(1_700_000_000_123);
        assert_eq!(id.as_str(), "temp-user-1700000000123");
        assert!(id.is_transient());
        assert!(!MessageId::new("m1").is_transient());
    }

    #[test]
    fn unchecked_constructor_keeps_empty_ids_detectable() {
        assert!(SessionId::new("").is_empty());
        assert!(!ChatId::from("chat-1").is_empty());
    }
}
