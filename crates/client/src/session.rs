use std::future::Future;
use std::sync::Arc;

use ragchat_core::{
    BuiltRequest, FailureKind, Language, MessageId, RequestConfig, RequestKind, RequestTarget,
    SessionError, SessionState, StreamReconciler, apply_reply, build_query, build_show_more,
    reconcile::ChunkOutcome,
};
use snafu::ResultExt;
use tokio::task::JoinHandle;

use crate::error::{ClientError, ClientResult, NoRuntimeSnafu, SessionSnafu};
use crate::transport::{
    ChatTransport, ExchangeRequest, TransportEvent, TransportEventStream, TransportFailure,
    TransportPayload,
};

/// A request handed to the transport, waiting to be driven.
pub struct Exchange {
    target: RequestTarget,
    kind: RequestKind,
    stream: TransportEventStream,
    worker: JoinHandle<()>,
}

impl Exchange {
    pub fn target(&self) -> RequestTarget {
        self.target
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.stream.recv().await
    }

    /// Signals the worker to stop; the session still needs a terminal event or a drive.
    pub fn cancel(&mut self) -> bool {
        self.stream.cancel()
    }
}

/// What one transport event did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Pending,
    Finished(MessageId),
    /// Addressed to a request that is no longer in flight.
    Stale,
}

/// One conversation bound to one backend.
pub struct ChatSession {
    state: SessionState,
    config: RequestConfig,
    transport: Arc<dyn ChatTransport>,
    reconciler: StreamReconciler,
    uploaded_files: Vec<String>,
}

impl ChatSession {
    pub fn new(language: Language, config: RequestConfig, transport: Arc<dyn ChatTransport>) -> Self {
        let state = SessionState::new(language, config.page_size);
        Self {
            state,
            config,
            transport,
            reconciler: StreamReconciler::new(),
            uploaded_files: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub fn language(&self) -> Language {
        self.state.language()
    }

    /// Clears the conversation; an in-flight request is abandoned.
    pub fn set_language(&mut self, language: Language) {
        self.state.set_language(language);
        self.reconciler = StreamReconciler::new();
    }

    pub fn uploaded_files(&self) -> &[String] {
        &self.uploaded_files
    }

    /// Returns false when the name was already listed.
    pub fn record_upload(&mut self, file_name: impl Into<String>) -> bool {
        let file_name = file_name.into();
        if self.uploaded_files.contains(&file_name) {
            return false;
        }
        self.uploaded_files.push(file_name);
        true
    }

    /// Sends a new question. Must run inside a Tokio runtime.
    pub fn submit(&mut self, input: &str) -> ClientResult<Exchange> {
        let built = build_query(input, &self.state, &self.config).context(SessionSnafu {
            stage: "build-query",
        })?;
        self.state
            .begin_request(built.target, built.kind)
            .context(SessionSnafu {
                stage: "begin-query",
            })?;

        let message = built.payload.message.clone();
        self.state.append_user_message(message.as_str());
        self.state.record_query(&message);
        self.start(built)
    }

    /// Asks for the next page of the last question; `None` when there is none.
    pub fn show_more(&mut self) -> ClientResult<Option<Exchange>> {
        if self.state.last_query().is_none() {
            tracing::debug!(
                session_id = %self.state.session_id(),
                "show more ignored without a previous query"
            );
            return Ok(None);
        }

        let built = build_show_more(&self.state, &self.config).context(SessionSnafu {
            stage: "build-show-more",
        })?;
        self.state
            .begin_request(built.target, built.kind)
            .context(SessionSnafu {
                stage: "begin-show-more",
            })?;
        self.start(built).map(Some)
    }

    fn start(&mut self, built: BuiltRequest) -> ClientResult<Exchange> {
        let target = built.target;
        self.reconciler = StreamReconciler::new();
        self.state
            .append_pending_assistant_message(target)
            .context(SessionSnafu {
                stage: "append-pending",
            })?;

        let runtime = match tokio::runtime::Handle::try_current().context(NoRuntimeSnafu {
            stage: "spawn-transport-worker",
        }) {
            Ok(runtime) => runtime,
            Err(error) => return Err(self.record_failure(target, error)),
        };

        let request = ExchangeRequest::new(target, built.payload, &self.config);
        let handle = match self.transport.exchange(request) {
            Ok(handle) => handle,
            Err(error) => return Err(self.record_failure(target, error)),
        };

        tracing::debug!(
            request = %target,
            transport = self.transport.id(),
            kind = ?built.kind,
            "chat exchange started"
        );
        Ok(Exchange {
            target,
            kind: built.kind,
            stream: handle.stream,
            worker: runtime.spawn(handle.worker),
        })
    }

    /// Folds one transport event into the session.
    ///
    /// Errors are recorded as an error message before they are returned.
    pub fn apply_event(&mut self, event: TransportEvent) -> ClientResult<EventOutcome> {
        let target = event.target;
        if !self.state.status().accepts_event(target) {
            tracing::debug!(request = %target, "ignoring event for a request no longer in flight");
            return Ok(EventOutcome::Stale);
        }

        match event.payload {
            TransportPayload::Started { streaming } => {
                self.state
                    .mark_response_started(target, streaming)
                    .context(SessionSnafu {
                        stage: "response-started",
                    })?;
                Ok(EventOutcome::Pending)
            }
            TransportPayload::Snapshot(line) => {
                let outcome = self
                    .reconciler
                    .apply_line(&mut self.state, target, &line)
                    .context(SessionSnafu {
                        stage: "apply-snapshot",
                    })?;
                match outcome {
                    ChunkOutcome::Applied(_) | ChunkOutcome::Ignored | ChunkOutcome::Skipped => {
                        Ok(EventOutcome::Pending)
                    }
                    ChunkOutcome::Terminal => self.finish_stream(target),
                    ChunkOutcome::Failed(message) => {
                        let error = SessionError::BackendReported {
                            stage: "stream-chunk",
                            message,
                        };
                        Err(self.record_failure(
                            target,
                            ClientError::Session {
                                stage: "stream-chunk",
                                source: error,
                            },
                        ))
                    }
                }
            }
            TransportPayload::Reply(body) => match apply_reply(&mut self.state, target, &body) {
                Ok(id) => {
                    tracing::info!(request = %target, message = %id, "chat reply received");
                    Ok(EventOutcome::Finished(id))
                }
                Err(source) => {
                    tracing::warn!(request = %target, error = %source, "chat reply rejected");
                    Err(self.record_failure(
                        target,
                        ClientError::Session {
                            stage: "apply-reply",
                            source,
                        },
                    ))
                }
            },
            TransportPayload::Done => self.finish_stream(target),
            TransportPayload::Failed(failure) => {
                Err(self.record_failure(target, failure.into_error("transport")))
            }
        }
    }

    /// Runs `exchange` until its request settles.
    pub async fn drive(&mut self, exchange: Exchange) -> ClientResult<MessageId> {
        self.drive_until(exchange, std::future::pending::<()>()).await
    }

    /// Like [`ChatSession::drive`], but resolving `stop` cancels the request.
    pub async fn drive_until<F>(
        &mut self,
        mut exchange: Exchange,
        stop: F,
    ) -> ClientResult<MessageId>
    where
        F: Future<Output = ()>,
    {
        let target = exchange.target;
        tokio::pin!(stop);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => {
                    exchange.cancel();
                    exchange.worker.abort();
                    tracing::info!(request = %target, "chat request cancelled by caller");
                    return Err(self.abandon(target, TransportFailure::Cancelled));
                }
                event = exchange.recv() => {
                    let Some(event) = event else {
                        return Err(self.abandon(
                            target,
                            TransportFailure::Network(
                                "transport closed before a terminal event".to_string(),
                            ),
                        ));
                    };
                    if let EventOutcome::Finished(id) = self.apply_event(event)? {
                        return Ok(id);
                    }
                }
            }
        }
    }

    pub async fn send(&mut self, input: &str) -> ClientResult<MessageId> {
        let exchange = self.submit(input)?;
        self.drive(exchange).await
    }

    pub async fn send_show_more(&mut self) -> ClientResult<Option<MessageId>> {
        match self.show_more()? {
            Some(exchange) => self.drive(exchange).await.map(Some),
            None => Ok(None),
        }
    }

    fn finish_stream(&mut self, target: RequestTarget) -> ClientResult<EventOutcome> {
        if self.reconciler.applied() == 0 {
            let locale = self.state.language().locale();
            return Err(self.record_failure(
                target,
                ClientError::Network {
                    stage: "finish-stream",
                    message: locale.no_response.to_string(),
                },
            ));
        }

        let completion = self.reconciler.completion(self.state.language());
        let id = self
            .state
            .finalize_assistant_message(target, completion)
            .context(SessionSnafu {
                stage: "finish-stream",
            })?;
        tracing::info!(
            request = %target,
            message = %id,
            chunks = self.reconciler.applied(),
            skipped = self.reconciler.skipped(),
            "chat stream finished"
        );
        Ok(EventOutcome::Finished(id))
    }

    fn abandon(&mut self, target: RequestTarget, failure: TransportFailure) -> ClientError {
        let error = failure.into_error("drive-exchange");
        if self.state.status().accepts_event(target) {
            self.record_failure(target, error)
        } else {
            error
        }
    }

    // Turns the in-flight request into a localized error message.
    fn record_failure(&mut self, target: RequestTarget, error: ClientError) -> ClientError {
        let locale = self.state.language().locale();
        let (failure, text) = match &error {
            ClientError::Timeout { .. } => (
                FailureKind::Timeout,
                locale.timeout_message(self.config.timeout_ms),
            ),
            ClientError::Cancelled { .. } => {
                (FailureKind::Cancelled, locale.error_cancelled.to_string())
            }
            ClientError::Status { detail, .. } => (
                FailureKind::Network,
                format!("{}: {detail}", locale.error_general),
            ),
            ClientError::Session {
                source: SessionError::BackendReported { message, .. },
                ..
            } => (
                FailureKind::Network,
                format!("{}: {message}", locale.error_general),
            ),
            other => (
                FailureKind::Network,
                format!("{}: {other}", locale.error_general),
            ),
        };

        if let Err(record_error) = self.state.fail_request(target, failure, text) {
            tracing::warn!(
                request = %target,
                error = %record_error,
                "could not record request failure"
            );
        }
        error
    }
}
