use std::path::PathBuf;

use ragchat_core::SessionError;
use snafu::Snafu;

pub type ClientResult<T> = Result<T, ClientError>;

/// Coarse failure classes surfaced to callers and to the chat log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Network,
    Timeout,
    Cancelled,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("environment '{name}' is not configured"))]
    UnknownEnvironment { stage: &'static str, name: String },
    #[snafu(display("no environment matches host {hostname:?} and none was selected"))]
    NoEnvironment {
        stage: &'static str,
        hostname: Option<String>,
    },
    #[snafu(display("base URL '{url}' is invalid on `{stage}`: {source}"))]
    InvalidBaseUrl {
        stage: &'static str,
        url: String,
        source: url::ParseError,
    },
    #[snafu(display("base URL '{url}' must use http or https"))]
    UnsupportedScheme { stage: &'static str, url: String },
    #[snafu(display("failed to load settings from {path:?} on `{stage}`: {source}"))]
    LoadSettings {
        stage: &'static str,
        path: PathBuf,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read file at {path:?} on `{stage}`: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("file {path:?} is not a supported document (pdf, docx, txt)"))]
    UnsupportedFile { stage: &'static str, path: PathBuf },
    #[snafu(display("text to analyze is empty"))]
    EmptyText { stage: &'static str },
    #[snafu(display("{source}"))]
    Session {
        stage: &'static str,
        source: SessionError,
    },
    #[snafu(display("failed to build HTTP client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("no Tokio runtime available on `{stage}`: {source}"))]
    NoRuntime {
        stage: &'static str,
        source: tokio::runtime::TryCurrentError,
    },
    #[snafu(display("transport '{transport_id}' is not supported"))]
    UnknownTransport {
        stage: &'static str,
        transport_id: String,
    },
    #[snafu(display("request failed on `{stage}`: {message}"))]
    Network { stage: &'static str, message: String },
    #[snafu(display("server returned status {status}: {detail}"))]
    Status {
        stage: &'static str,
        status: u16,
        detail: String,
    },
    #[snafu(display("response body is not valid JSON on `{stage}`: {source}"))]
    InvalidResponse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("request timed out after {elapsed_ms} ms"))]
    Timeout { stage: &'static str, elapsed_ms: u64 },
    #[snafu(display("request was cancelled"))]
    Cancelled { stage: &'static str },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownEnvironment { .. }
            | Self::NoEnvironment { .. }
            | Self::InvalidBaseUrl { .. }
            | Self::UnsupportedScheme { .. }
            | Self::LoadSettings { .. }
            | Self::CreateDir { .. }
            | Self::SerializeSettings { .. }
            | Self::WriteFile { .. }
            | Self::RenameTempFile { .. }
            | Self::BuildClient { .. }
            | Self::NoRuntime { .. }
            | Self::UnknownTransport { .. } => ErrorKind::Configuration,
            Self::ReadFile { .. } | Self::UnsupportedFile { .. } | Self::EmptyText { .. } => {
                ErrorKind::Validation
            }
            Self::Session { source, .. } => match source {
                SessionError::IllegalTransition { .. } => ErrorKind::Validation,
                other if other.is_validation() => ErrorKind::Validation,
                _ => ErrorKind::Network,
            },
            Self::Network { .. } | Self::Status { .. } | Self::InvalidResponse { .. } => {
                ErrorKind::Network
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snafu::IntoError;

    #[test]
    fn session_errors_map_to_validation_or_network() {
        let empty = SessionSnafu { stage: "test" }.into_error(
            ragchat_core::build_query(
                "",
                &ragchat_core::SessionState::new(Default::default(), 5),
                &ragchat_core::RequestConfig::new("http://a", "/b"),
            )
            .unwrap_err(),
        );
        assert_eq!(empty.kind(), ErrorKind::Validation);

        let missing = SessionSnafu { stage: "test" }.into_error(
            ragchat_core::normalize_reply("{}", Default::default()).unwrap_err(),
        );
        assert_eq!(missing.kind(), ErrorKind::Network);
    }

    #[test]
    fn timeout_and_cancel_have_their_own_kinds() {
        assert_eq!(
            ClientError::Timeout {
                stage: "test",
                elapsed_ms: 10
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ClientError::Cancelled { stage: "test" }.kind(),
            ErrorKind::Cancelled
        );
    }
}
