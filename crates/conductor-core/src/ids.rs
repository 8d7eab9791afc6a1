use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// String-backed id newtype with a fixed prefix. Uuid v7 keeps freshly
/// minted ids sortable by creation time, which makes logs and debug dumps
/// read chronologically.
macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Wraps an externally supplied value without validating the
            /// prefix; wire input keeps whatever shape the client sent.
            pub fn from_raw(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self::from_raw(s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Identity of one conversation.
    SessionId,
    "sess"
);
branded_id!(
    /// Join key between a tool call and its result. Unique per session;
    /// a collision would corrupt result correlation.
    ToolCallId,
    "call"
);
branded_id!(
    /// One connected WebSocket client.
    ClientId,
    "client"
);

/// Project identity is supplied by the caller (the hosting app names its
/// projects), so it is a plain newtype rather than a generated id. Emptiness
/// is rejected at session creation, not here.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_carries_its_prefix() {
        assert!(SessionId::new().as_str().starts_with("sess_"));
        assert!(ToolCallId::new().as_str().starts_with("call_"));
        assert!(ClientId::new().as_str().starts_with("client_"));
    }

    #[test]
    fn fresh_ids_never_collide() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn fresh_ids_sort_by_creation() {
        let ids: Vec<ToolCallId> = (0..100).map(|_| ToolCallId::new()).collect();
        for pair in ids.windows(2) {
            assert!(
                pair[0].as_str() < pair[1].as_str(),
                "out of order: {} then {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn display_parse_and_serde_round_trip() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        let call = ToolCallId::new();
        let json = serde_json::to_string(&call).unwrap();
        let back: ToolCallId = serde_json::from_str(&json).unwrap();
        assert_eq!(call, back);
    }

    #[test]
    fn from_raw_keeps_foreign_values() {
        assert_eq!(SessionId::from_raw("custom-id-123").as_str(), "custom-id-123");
    }

    #[test]
    fn project_id_emptiness_ignores_whitespace() {
        assert!(ProjectId::from("").is_empty());
        assert!(ProjectId::from("   ").is_empty());
        assert!(!ProjectId::from("proj-1").is_empty());
    }
}
