use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use ragchat_core::{QueryPayload, RequestConfig, RequestTarget, ResponseMode};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ClientError, ClientResult};

pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// One chat POST, addressed and shaped.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRequest {
    pub target: RequestTarget,
    pub url: String,
    pub body: QueryPayload,
    pub timeout: Duration,
    pub response_mode: ResponseMode,
}

impl ExchangeRequest {
    pub fn new(target: RequestTarget, body: QueryPayload, config: &RequestConfig) -> Self {
        Self {
            target,
            url: config.endpoint_url(),
            body,
            timeout: Duration::from_millis(config.timeout_ms),
            response_mode: config.response_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout { elapsed_ms: u64 },
    Cancelled,
    Status { status: u16, detail: Option<String> },
    Network(String),
}

impl TransportFailure {
    pub fn into_error(self, stage: &'static str) -> ClientError {
        match self {
            Self::Timeout { elapsed_ms } => ClientError::Timeout { stage, elapsed_ms },
            Self::Cancelled => ClientError::Cancelled { stage },
            Self::Status { status, detail } => ClientError::Status {
                stage,
                status,
                detail: detail.unwrap_or_else(|| format!("HTTP {status}")),
            },
            Self::Network(message) => ClientError::Network { stage, message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPayload {
    /// Headers arrived; `streaming` tells how the body will be delivered.
    Started { streaming: bool },
    /// One newline-delimited fragment, framing untouched.
    Snapshot(String),
    /// Entire single-shot body.
    Reply(String),
    Done,
    Failed(TransportFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub target: RequestTarget,
    pub payload: TransportPayload,
}

pub struct TransportEventStream {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct TransportHandle {
    pub stream: TransportEventStream,
    pub worker: TransportWorker,
}

impl TransportEventStream {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for TransportEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Carries chat requests to a backend.
///
/// Implementations return immediately; the network work happens in the
/// returned worker, which the caller spawns.
pub trait ChatTransport: Send + Sync {
    fn id(&self) -> &str;
    fn exchange(&self, request: ExchangeRequest) -> ClientResult<TransportHandle>;
}

pub fn make_event_stream() -> (
    mpsc::UnboundedSender<TransportEvent>,
    TransportEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        TransportEventStream::new(event_rx, cancel_tx),
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragchat_core::SessionId;

    #[tokio::test]
    async fn dropping_the_stream_signals_cancel() {
        let target = RequestTarget::next(SessionId::new_v7());
        let (event_tx, stream, cancel_rx) = make_event_stream();

        drop(stream);

        assert!(cancel_rx.await.is_ok());
        assert!(
            event_tx
                .send(TransportEvent {
                    target,
                    payload: TransportPayload::Done,
                })
                .is_err()
        );
    }

    #[tokio::test]
    async fn explicit_cancel_fires_once() {
        let (_event_tx, mut stream, _cancel_rx) = make_event_stream();

        assert!(stream.cancel());
        assert!(!stream.cancel());
    }

    #[test]
    fn failures_map_to_client_error_kinds() {
        use crate::ErrorKind;

        assert_eq!(
            TransportFailure::Timeout { elapsed_ms: 5 }
                .into_error("test")
                .kind(),
            ErrorKind::Timeout
        );
        let status = TransportFailure::Status {
            status: 503,
            detail: None,
        }
        .into_error("test");
        assert_eq!(status.kind(), ErrorKind::Network);
        assert_eq!(status.to_string(), "server returned status 503: HTTP 503");
    }
}
