use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, SessionError, SessionResult};

// Wire-visible ids share one shape so they print and parse the same way.
macro_rules! define_wire_id {
    ($name:ident, $id_type:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> SessionResult<Self> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-wire-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = SessionError;

            fn from_str(raw: &str) -> SessionResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_wire_id!(SessionId, "session-id");
define_wire_id!(RequestId, "request-id");

/// Position of a message inside one session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Routing key for one request; events carrying another key are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTarget {
    pub session_id: SessionId,
    pub request_id: RequestId,
}

impl RequestTarget {
    pub const fn new(session_id: SessionId, request_id: RequestId) -> Self {
        Self {
            session_id,
            request_id,
        }
    }

    /// Mints a fresh request id inside `session_id`.
    pub fn next(session_id: SessionId) -> Self {
        Self::new(session_id, RequestId::new_v7())
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.session_id, self.request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_ids_parse_their_display_form() {
        let id = SessionId::new_v7();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_wire_id_is_rejected() {
        let error = RequestId::parse("req-1700000000").unwrap_err();
        assert!(matches!(
            error,
            SessionError::InvalidId {
                id_type: "request-id",
                ..
            }
        ));
    }

    #[test]
    fn next_target_keeps_session_and_mints_request() {
        let session_id = SessionId::new_v7();
        let first = RequestTarget::next(session_id);
        let second = RequestTarget::next(session_id);
        assert_eq!(first.session_id, second.session_id);
        assert_ne!(first.request_id, second.request_id);
    }

    #[test]
    fn ids_travel_as_bare_values() {
        let session_id = SessionId::new_v7();
        let json = serde_json::to_string(&session_id).unwrap();
        assert_eq!(json, format!("\"{session_id}\""));
        assert_eq!(serde_json::from_str::<SessionId>(&json).unwrap(), session_id);

        assert_eq!(serde_json::to_string(&MessageId::new(3)).unwrap(), "3");
        assert_eq!(serde_json::from_str::<MessageId>("3").unwrap(), MessageId::new(3));
    }
}
