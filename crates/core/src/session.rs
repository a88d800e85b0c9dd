use std::time::{SystemTime, UNIX_EPOCH};

use snafu::OptionExt;

use super::error::{
    IllegalTransitionSnafu, NoActiveRequestSnafu, NoPriorQuerySnafu, SessionResult,
    UnknownMessageSnafu,
};
use super::ids::{MessageId, RequestTarget, SessionId};
use super::language::Language;
use super::message::{FailureKind, Message, Role, Source};

pub const DEFAULT_PAGE_SIZE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
    pub total_results: u64,
    pub total_pages: Option<u32>,
}

impl Pagination {
    pub fn first(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
            has_more: false,
            total_results: 0,
            total_pages: None,
        }
    }

    fn apply(&mut self, update: Option<PaginationUpdate>) {
        let Some(update) = update else {
            self.has_more = false;
            return;
        };

        if let Some(page) = update.current_page {
            self.page = page.max(1);
        }
        if let Some(total) = update.total_results {
            self.total_results = total;
        }
        if update.total_pages.is_some() {
            self.total_pages = update.total_pages;
        }
        self.has_more = update.has_more.unwrap_or_else(|| match self.total_pages {
            Some(pages) => self.page < pages,
            None => u64::from(self.page) * u64::from(self.page_size) < self.total_results,
        });
    }
}

/// Pagination fields reported by a backend reply; absent fields keep prior values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaginationUpdate {
    pub current_page: Option<u32>,
    pub total_results: Option<u64>,
    pub total_pages: Option<u32>,
    pub has_more: Option<bool>,
}

/// What the request in flight asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Query,
    ShowMore { page: u32 },
}

/// Final reply content handed to [`SessionState::finalize_assistant_message`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    /// `None` keeps whatever the stream snapshots left in the message.
    pub text: Option<String>,
    /// `None` keeps sources attached by earlier snapshots.
    pub sources: Option<Vec<Source>>,
    pub suggested_questions: Vec<String>,
    pub pagination: Option<PaginationUpdate>,
}

/// Request lifecycle for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Sending(RequestTarget),
    AwaitingResponse(RequestTarget),
    Streaming(RequestTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    Send(RequestTarget),
    Respond {
        target: RequestTarget,
        streaming: bool,
    },
    Finish(RequestTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejection {
    AlreadyInFlight {
        active: RequestTarget,
        attempted: RequestTarget,
    },
    NoActiveRequest,
    RequestMismatch {
        active: RequestTarget,
        attempted: RequestTarget,
    },
}

pub type StatusTransitionResult = Result<SessionStatus, TransitionRejection>;

impl SessionStatus {
    pub fn active_target(&self) -> Option<RequestTarget> {
        match self {
            Self::Sending(target) | Self::AwaitingResponse(target) | Self::Streaming(target) => {
                Some(*target)
            }
            Self::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// True when events for `target` belong to the request in flight.
    pub fn accepts_event(&self, target: RequestTarget) -> bool {
        self.active_target() == Some(target)
    }

    /// Applies one transition deterministically.
    ///
    /// Only `Idle` may start a request. Every other transition must name the
    /// request in flight exactly.
    pub fn apply(&self, transition: StatusTransition) -> StatusTransitionResult {
        match transition {
            StatusTransition::Send(target) => self.apply_send(target),
            StatusTransition::Respond { target, streaming } => {
                self.apply_respond(target, streaming)
            }
            StatusTransition::Finish(target) => self.apply_finish(target),
        }
    }

    fn apply_send(&self, target: RequestTarget) -> StatusTransitionResult {
        match self.active_target() {
            Some(active) => Err(TransitionRejection::AlreadyInFlight {
                active,
                attempted: target,
            }),
            None => Ok(Self::Sending(target)),
        }
    }

    fn apply_respond(&self, target: RequestTarget, streaming: bool) -> StatusTransitionResult {
        self.check_active(target)?;
        if streaming || matches!(self, Self::Streaming(_)) {
            Ok(Self::Streaming(target))
        } else {
            Ok(Self::AwaitingResponse(target))
        }
    }

    fn apply_finish(&self, target: RequestTarget) -> StatusTransitionResult {
        self.check_active(target)?;
        Ok(Self::Idle)
    }

    fn check_active(&self, target: RequestTarget) -> Result<(), TransitionRejection> {
        match self.active_target() {
            Some(active) if active == target => Ok(()),
            Some(active) => Err(TransitionRejection::RequestMismatch {
                active,
                attempted: target,
            }),
            None => Err(TransitionRejection::NoActiveRequest),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    target: RequestTarget,
    kind: RequestKind,
    pending_message: Option<MessageId>,
    previous_page: u32,
}

/// Conversation state owned by one chat widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    session_id: SessionId,
    language: Language,
    messages: Vec<Message>,
    suggestions: Vec<String>,
    pagination: Pagination,
    last_query: Option<String>,
    status: SessionStatus,
    in_flight: Option<InFlight>,
    next_message_id: u64,
}

impl SessionState {
    pub fn new(language: Language, page_size: u32) -> Self {
        Self::with_session_id(SessionId::new_v7(), language, page_size)
    }

    pub fn with_session_id(session_id: SessionId, language: Language, page_size: u32) -> Self {
        let mut state = Self {
            session_id,
            language,
            messages: Vec::new(),
            suggestions: Vec::new(),
            pagination: Pagination::first(page_size),
            last_query: None,
            status: SessionStatus::Idle,
            in_flight: None,
            next_message_id: 1,
        };
        state.seed_welcome();
        state
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    /// Suggestions returned by the backend; empty until the first reply.
    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// Suggestions to render: the backend list, or the static list for the language.
    pub fn visible_suggestions(&self) -> Vec<&str> {
        if self.suggestions.is_empty() {
            self.language.locale().suggestions.to_vec()
        } else {
            self.suggestions.iter().map(String::as_str).collect()
        }
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn pending_message_id(&self) -> Option<MessageId> {
        self.in_flight.and_then(|in_flight| in_flight.pending_message)
    }

    pub fn append_user_message(&mut self, text: impl Into<String>) -> MessageId {
        self.push(Role::User, text)
    }

    /// Remembers `query` as the anchor for later "show more" requests.
    pub fn record_query(&mut self, query: &str) {
        self.last_query = Some(query.to_string());
        self.reset_page();
    }

    /// Moves the session to `Sending`. A "show more" request advances the page cursor.
    pub fn begin_request(&mut self, target: RequestTarget, kind: RequestKind) -> SessionResult<()> {
        let next_status = self.transition(StatusTransition::Send(target), "begin-request")?;
        let previous_page = self.pagination.page;

        if let RequestKind::ShowMore { page } = kind {
            let advanced = self.advance_page()?;
            if advanced != page {
                tracing::debug!(
                    session_id = %self.session_id,
                    requested_page = page,
                    advanced_page = advanced,
                    "show-more page differs from local cursor; using requested page"
                );
                self.pagination.page = page;
            }
        }

        self.status = next_status;
        self.in_flight = Some(InFlight {
            target,
            kind,
            pending_message: None,
            previous_page,
        });
        Ok(())
    }

    pub fn append_pending_assistant_message(
        &mut self,
        target: RequestTarget,
    ) -> SessionResult<MessageId> {
        let in_flight = self.in_flight_for(target, "append-pending-assistant")?;
        if let Some(existing) = in_flight.pending_message {
            return Ok(existing);
        }

        let id = self.allocate_message_id();
        let timestamp_ms = self.next_timestamp();
        self.messages
            .push(Message::assistant_pending(id, timestamp_ms, self.language));
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.pending_message = Some(id);
        }
        Ok(id)
    }

    pub fn mark_response_started(
        &mut self,
        target: RequestTarget,
        streaming: bool,
    ) -> SessionResult<()> {
        self.status = self.transition(
            StatusTransition::Respond { target, streaming },
            "mark-response-started",
        )?;
        Ok(())
    }

    /// Replaces the pending message body with a full stream snapshot.
    pub fn apply_snapshot(
        &mut self,
        target: RequestTarget,
        text: String,
        sources: Option<Vec<Source>>,
    ) -> SessionResult<MessageId> {
        if !matches!(self.status, SessionStatus::Streaming(_)) {
            self.mark_response_started(target, true)?;
        }
        let id = self.append_pending_assistant_message(target)?;
        let message = self.message_mut(id, "apply-snapshot")?;
        message.text = text;
        if let Some(sources) = sources {
            message.sources = sources;
        }
        Ok(id)
    }

    pub fn finalize_assistant_message(
        &mut self,
        target: RequestTarget,
        completion: Completion,
    ) -> SessionResult<MessageId> {
        let next_status = self.transition(StatusTransition::Finish(target), "finalize-assistant")?;
        let id = self.append_pending_assistant_message(target)?;

        let message = self.message_mut(id, "finalize-assistant")?;
        if let Some(text) = completion.text {
            message.text = text;
        }
        if let Some(sources) = completion.sources {
            message.sources = sources;
        }
        message.suggested_questions = completion.suggested_questions.clone();
        message.is_streaming = false;

        self.suggestions = completion.suggested_questions;
        self.pagination.apply(completion.pagination);
        self.status = next_status;
        self.in_flight = None;
        Ok(id)
    }

    /// Resolves the request in flight into an error message.
    ///
    /// The pending placeholder, if any, is converted in place so nothing is left streaming.
    pub fn fail_request(
        &mut self,
        target: RequestTarget,
        failure: FailureKind,
        text: impl Into<String>,
    ) -> SessionResult<MessageId> {
        let next_status = self.transition(StatusTransition::Finish(target), "fail-request")?;
        let in_flight = self.in_flight_for(target, "fail-request")?;
        let text = text.into();

        let id = match in_flight.pending_message {
            Some(id) => {
                let message = self.message_mut(id, "fail-request")?;
                message.role = Role::Error;
                message.text = text;
                message.is_streaming = false;
                message.failure = Some(failure);
                id
            }
            None => {
                let id = self.push(Role::Error, text);
                if let Some(message) = self.messages.last_mut() {
                    message.failure = Some(failure);
                }
                id
            }
        };

        if matches!(in_flight.kind, RequestKind::ShowMore { .. }) {
            self.pagination.page = in_flight.previous_page;
        }
        self.status = next_status;
        self.in_flight = None;
        Ok(id)
    }

    /// Clears the conversation and reseeds the localized welcome.
    pub fn set_language(&mut self, language: Language) {
        if let Some(in_flight) = self.in_flight.take() {
            tracing::warn!(
                session_id = %self.session_id,
                request = %in_flight.target,
                "language changed while a request was in flight; its events will be ignored"
            );
        }

        self.language = language;
        self.messages.clear();
        self.suggestions.clear();
        self.last_query = None;
        self.pagination = Pagination::first(self.pagination.page_size);
        self.status = SessionStatus::Idle;
        self.seed_welcome();
    }

    /// Advances the page cursor for a continuation of `last_query`.
    pub fn advance_page(&mut self) -> SessionResult<u32> {
        self.last_query.as_ref().context(NoPriorQuerySnafu {
            stage: "advance-page",
        })?;
        self.pagination.page = self.pagination.page.saturating_add(1);
        Ok(self.pagination.page)
    }

    pub fn reset_page(&mut self) {
        self.pagination = Pagination::first(self.pagination.page_size);
    }

    fn seed_welcome(&mut self) {
        let locale = self.language.locale();
        self.push(Role::Assistant, locale.welcome);
        self.push(Role::System, locale.welcome_hint);
    }

    fn push(&mut self, role: Role, text: impl Into<String>) -> MessageId {
        let id = self.allocate_message_id();
        let timestamp_ms = self.next_timestamp();
        self.messages
            .push(Message::new(id, role, text, timestamp_ms, self.language));
        id
    }

    fn allocate_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    // Wall-clock time clamped so the log never goes backwards.
    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let last = self
            .messages
            .last()
            .map(|message| message.timestamp_ms)
            .unwrap_or_default();
        now.max(last)
    }

    fn transition(
        &self,
        transition: StatusTransition,
        stage: &'static str,
    ) -> SessionResult<SessionStatus> {
        let attempted = match transition {
            StatusTransition::Send(target)
            | StatusTransition::Respond { target, .. }
            | StatusTransition::Finish(target) => target,
        };

        self.status.apply(transition).map_err(|rejection| {
            IllegalTransitionSnafu {
                stage,
                attempted,
                rejection,
            }
            .build()
        })
    }

    fn in_flight_for(
        &self,
        target: RequestTarget,
        stage: &'static str,
    ) -> SessionResult<InFlight> {
        match self.in_flight {
            Some(in_flight) if in_flight.target == target => Ok(in_flight),
            Some(in_flight) => IllegalTransitionSnafu {
                stage,
                attempted: target,
                rejection: TransitionRejection::RequestMismatch {
                    active: in_flight.target,
                    attempted: target,
                },
            }
            .fail(),
            None => NoActiveRequestSnafu { stage }.fail(),
        }
    }

    fn message_mut(&mut self, id: MessageId, stage: &'static str) -> SessionResult<&mut Message> {
        self.messages
            .iter_mut()
            .find(|message| message.id == id)
            .context(UnknownMessageSnafu {
                stage,
                message_id: id,
            })
    }
}
