use std::time::Instant;

use futures::StreamExt;
use ragchat_core::ResponseMode;
use ragchat_core::reconcile::error_text;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::{BuildClientSnafu, ClientResult};
use crate::transport::{
    ChatTransport, ExchangeRequest, TransportEvent, TransportFailure, TransportHandle,
    TransportPayload, TransportWorker, make_event_stream,
};

pub const HTTP_TRANSPORT_ID: &str = "http";

const STREAM_CONTENT_TYPES: &[&str] = &[
    "application/x-ndjson",
    "application/ndjson",
    "application/jsonl",
    "application/json-seq",
    "text/event-stream",
];

/// Chat transport over `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ragchat/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(BuildClientSnafu {
                stage: "build-http-client",
            })?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn run_exchange_worker(
        client: reqwest::Client,
        request: ExchangeRequest,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target;
        let started_at = Instant::now();
        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);
        let exchange = Self::exchange_body(&client, &request, &event_tx);
        tokio::pin!(exchange);

        // Dropping the pinned exchange future aborts the connection.
        let outcome = tokio::select! {
            _ = &mut cancel_rx => Err(TransportFailure::Cancelled),
            _ = &mut deadline => Err(TransportFailure::Timeout {
                elapsed_ms: elapsed_ms(started_at),
            }),
            result = &mut exchange => result,
        };

        let payload = match outcome {
            Ok(()) => {
                tracing::debug!(
                    request = %target,
                    elapsed_ms = elapsed_ms(started_at),
                    "chat exchange finished"
                );
                TransportPayload::Done
            }
            Err(TransportFailure::Cancelled) => {
                tracing::debug!(request = %target, "chat exchange cancelled");
                TransportPayload::Failed(TransportFailure::Cancelled)
            }
            Err(failure) => {
                tracing::warn!(
                    request = %target,
                    url = %request.url,
                    elapsed_ms = elapsed_ms(started_at),
                    failure = ?failure,
                    "chat exchange failed"
                );
                TransportPayload::Failed(failure)
            }
        };
        let _ = event_tx.send(TransportEvent { target, payload });
    }

    async fn exchange_body(
        client: &reqwest::Client,
        request: &ExchangeRequest,
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportFailure> {
        let emit = |payload: TransportPayload| {
            event_tx
                .send(TransportEvent {
                    target: request.target,
                    payload,
                })
                .map_err(|_| TransportFailure::Cancelled)
        };

        let response = client
            .post(&request.url)
            .json(&request.body)
            .send()
            .await
            .map_err(network_failure)?;

        let status = response.status();
        tracing::debug!(
            request = %request.target,
            status = status.as_u16(),
            "chat response headers received"
        );
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportFailure::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        let streaming = match request.response_mode {
            ResponseMode::Single => false,
            ResponseMode::Stream => true,
            ResponseMode::Auto => is_stream_response(response.headers()),
        };
        emit(TransportPayload::Started { streaming })?;

        if !streaming {
            let body = response.text().await.map_err(network_failure)?;
            return emit(TransportPayload::Reply(body));
        }

        let mut framer = LineFramer::default();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(network_failure)?;
            for line in framer.push(&chunk) {
                emit(TransportPayload::Snapshot(line))?;
            }
        }
        if let Some(line) = framer.finish() {
            emit(TransportPayload::Snapshot(line))?;
        }
        Ok(())
    }
}

impl ChatTransport for HttpTransport {
    fn id(&self) -> &str {
        HTTP_TRANSPORT_ID
    }

    fn exchange(&self, request: ExchangeRequest) -> ClientResult<TransportHandle> {
        tracing::info!(
            request = %request.target,
            url = %request.url,
            timeout_ms = request.timeout.as_millis() as u64,
            "sending chat request"
        );

        let (event_tx, stream, cancel_rx) = make_event_stream();
        let worker: TransportWorker = Box::pin(Self::run_exchange_worker(
            self.client.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(TransportHandle { stream, worker })
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    started_at.elapsed().as_millis() as u64
}

fn network_failure(error: reqwest::Error) -> TransportFailure {
    TransportFailure::Network(error.to_string())
}

pub(crate) fn is_stream_response(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let mime = value.split(';').next().unwrap_or_default().trim();
            STREAM_CONTENT_TYPES
                .iter()
                .any(|known| mime.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Structured `detail`, `error` or `message` from an error body.
pub(crate) fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "error", "message"]
        .iter()
        .find_map(|field| value.get(field).and_then(error_text))
}

/// Splits a byte stream into trimmed, non-empty lines.
#[derive(Debug, Default)]
pub(crate) struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=position).collect();
            if let Some(line) = decode_line(&line) {
                lines.push(line);
            }
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn framer_joins_lines_split_across_chunks() {
        let mut framer = LineFramer::default();
        assert!(framer.push(b"{\"response\":\"He").is_empty());
        assert_eq!(
            framer.push(b"llo\"}\r\n\n{\"resp"),
            vec!["{\"response\":\"Hello\"}".to_string()]
        );
        assert_eq!(framer.finish().as_deref(), Some("{\"resp"));
        assert!(framer.finish().is_none());
    }

    #[test]
    fn framer_keeps_multibyte_text_intact() {
        let mut framer = LineFramer::default();
        let text = "{\"response\":\"Привет\"}\n".as_bytes();
        let (head, tail) = text.split_at(16);
        assert!(framer.push(head).is_empty());
        assert_eq!(framer.push(tail), vec!["{\"response\":\"Привет\"}".to_string()]);
    }

    #[test]
    fn stream_content_types_are_detected() {
        let mut headers = HeaderMap::new();
        assert!(!is_stream_response(&headers));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-ndjson; charset=utf-8"),
        );
        assert!(is_stream_response(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_stream_response(&headers));
    }

    #[test]
    fn error_detail_prefers_structured_fields() {
        assert_eq!(
            error_detail(r#"{"detail":"Session not found"}"#).as_deref(),
            Some("Session not found")
        );
        assert_eq!(
            error_detail(r#"{"error":{"message":"quota"}}"#).as_deref(),
            Some("quota")
        );
        assert!(error_detail("<html>502</html>").is_none());
        assert!(error_detail(r#"{"status":"bad"}"#).is_none());
    }
}
