use serde::{Deserialize, Serialize};

use super::ids::MessageId;
use super::language::Language;
use super::sanitize::{escape_html, sanitize_markup};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Error,
}

/// Why a request ended in an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Timeout,
    Network,
    Cancelled,
}

impl FailureKind {
    /// Timeouts and transient network failures are worth resubmitting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network)
    }
}

/// Backend-attributed document fragment supporting an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub citation: Option<String>,
    pub content: String,
    /// Page number or other location hint, as reported by the backend.
    pub location: Option<String>,
    pub clickable: bool,
    pub url: Option<String>,
}

impl Source {
    pub fn display_title(&self) -> String {
        escape_html(&self.title)
    }

    pub fn display_content(&self) -> String {
        sanitize_markup(&self.content)
    }

    pub fn display_citation(&self) -> Option<String> {
        self.citation.as_deref().map(sanitize_markup)
    }

    /// Link target, only for sources the backend marked clickable.
    pub fn link(&self) -> Option<&str> {
        if self.clickable {
            self.url.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub timestamp_ms: u64,
    pub language: Language,
    pub sources: Vec<Source>,
    pub suggested_questions: Vec<String>,
    pub is_streaming: bool,
    pub failure: Option<FailureKind>,
}

impl Message {
    pub fn new(
        id: MessageId,
        role: Role,
        text: impl Into<String>,
        timestamp_ms: u64,
        language: Language,
    ) -> Self {
        Self {
            id,
            role,
            text: text.into(),
            timestamp_ms,
            language,
            sources: Vec::new(),
            suggested_questions: Vec::new(),
            is_streaming: false,
            failure: None,
        }
    }

    /// Assistant placeholder filled in by the reply or by stream snapshots.
    pub fn assistant_pending(id: MessageId, timestamp_ms: u64, language: Language) -> Self {
        Self {
            is_streaming: true,
            ..Self::new(id, Role::Assistant, String::new(), timestamp_ms, language)
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.role, Role::Error)
    }

    /// Message text ready for an HTML view.
    pub fn display_html(&self) -> String {
        match self.role {
            Role::User => escape_html(&self.text),
            Role::Assistant | Role::System | Role::Error => sanitize_markup(&self.text),
        }
    }
}
