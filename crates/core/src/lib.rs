#![deny(unsafe_code)]

//! Session model for the RAG chat front ends.
//!
//! Everything here is synchronous and I/O free: request payloads are built
//! from a [`SessionState`], and backend replies are folded back into it.
pub mod error;
pub mod ids;
pub mod language;
pub mod message;
pub mod reconcile;
pub mod request;
pub mod sanitize;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use ids::{MessageId, RequestId, RequestTarget, SessionId};
pub use language::{Language, LanguageCodeStyle, Locale};
pub use message::{FailureKind, Message, Role, Source};
pub use reconcile::{ChunkOutcome, Fragment, StreamReconciler, apply_reply, normalize_reply};
pub use request::{
    BuiltRequest, LlmOptions, QueryPayload, RequestConfig, ResponseMode, build_query,
    build_show_more,
};
pub use sanitize::{escape_html, sanitize_markup};
pub use session::{
    Completion, DEFAULT_PAGE_SIZE, Pagination, PaginationUpdate, RequestKind, SessionState,
    SessionStatus, StatusTransition, TransitionRejection,
};
