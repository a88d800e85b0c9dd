use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ragchat_core::{Language, SessionId};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};

use crate::endpoint::ResolvedService;
use crate::error::{ClientError, ClientResult, ReadFileSnafu, UnsupportedFileSnafu};
use crate::http::error_detail;

/// Extensions the document services index, with their MIME types.
pub const SUPPORTED_DOCUMENTS: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("txt", "text/plain"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub file_name: String,
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    message: Option<String>,
    status: Option<String>,
}

/// Returns the MIME type for a supported document path.
pub fn document_mime(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    SUPPORTED_DOCUMENTS
        .iter()
        .find(|(known, _)| *known == extension)
        .map(|(_, mime)| *mime)
}

/// Multipart upload of one document into a session's index.
pub async fn upload_document(
    client: &reqwest::Client,
    service: &ResolvedService,
    path: &Path,
    session_id: SessionId,
    language: Language,
    timeout: Duration,
) -> ClientResult<UploadReceipt> {
    let mime = document_mime(path).context(UnsupportedFileSnafu {
        stage: "check-document-type",
        path: path.to_path_buf(),
    })?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .context(UnsupportedFileSnafu {
            stage: "read-document-name",
            path: path.to_path_buf(),
        })?;

    let bytes = tokio::fs::read(path).await.context(ReadFileSnafu {
        stage: "read-document",
        path: PathBuf::from(path),
    })?;
    let size = bytes.len();
    let part = Part::bytes(bytes)
        .file_name(file_name.clone())
        .mime_str(mime)
        .map_err(|error| ClientError::Network {
            stage: "build-upload-part",
            message: error.to_string(),
        })?;
    let form = Form::new()
        .part(service.upload_field.clone(), part)
        .text("session_id", session_id.to_string())
        .text("language", language.wire_code(service.language_style));

    let url = service.upload_url();
    let started_at = Instant::now();
    tracing::info!(url = %url, file = %file_name, bytes = size, "uploading document");

    let send = async {
        let response = client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|error| ClientError::Network {
                stage: "send-upload",
                message: error.to_string(),
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|error| ClientError::Network {
            stage: "read-upload-response",
            message: error.to_string(),
        })?;
        if !status.is_success() {
            return Err(ClientError::Status {
                stage: "upload-status",
                status: status.as_u16(),
                detail: error_detail(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            });
        }
        Ok(body)
    };

    let body = match tokio::time::timeout(timeout, send).await {
        Ok(result) => result?,
        Err(_) => {
            let elapsed_ms = started_at.elapsed().as_millis() as u64;
            tracing::warn!(url = %url, elapsed_ms, "document upload timed out");
            return Err(ClientError::Timeout {
                stage: "upload-document",
                elapsed_ms,
            });
        }
    };

    let response: UploadResponse = serde_json::from_str(&body).unwrap_or_default();
    tracing::info!(
        file = %file_name,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "document uploaded"
    );
    Ok(UploadReceipt {
        file_name,
        message: response.message.or(response.status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_document_types_are_accepted() {
        assert_eq!(
            document_mime(Path::new("/tmp/Report.PDF")),
            Some("application/pdf")
        );
        assert_eq!(document_mime(Path::new("notes.txt")), Some("text/plain"));
        assert!(document_mime(Path::new("photo.png")).is_none());
        assert!(document_mime(Path::new("README")).is_none());
    }
}
