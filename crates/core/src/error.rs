use snafu::Snafu;

use super::ids::{MessageId, RequestTarget};
use super::session::TransitionRejection;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("query text is empty"))]
    EmptyQuery { stage: &'static str },
    #[snafu(display("no previous query to continue with \"show more\""))]
    NoPriorQuery { stage: &'static str },
    #[snafu(display("request {attempted} rejected: {rejection:?}"))]
    IllegalTransition {
        stage: &'static str,
        attempted: RequestTarget,
        rejection: TransitionRejection,
    },
    #[snafu(display("no request is in flight"))]
    NoActiveRequest { stage: &'static str },
    #[snafu(display("message {message_id} is not part of this session"))]
    UnknownMessage {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("response carries no answer field (looked for {fields})"))]
    MissingAnswer {
        stage: &'static str,
        fields: &'static str,
    },
    #[snafu(display("backend reported an error: {message}"))]
    BackendReported {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("response payload is not valid JSON on `{stage}`: {source}"))]
    InvalidPayload {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("language '{raw}' is not supported"))]
    UnknownLanguage { stage: &'static str, raw: String },
}

impl SessionError {
    /// True for errors raised before any request leaves the process.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyQuery { .. } | Self::NoPriorQuery { .. } | Self::UnknownLanguage { .. }
        )
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
