use serde::{Deserialize, Serialize};
use snafu::OptionExt;

use super::error::{EmptyQuerySnafu, NoPriorQuerySnafu, SessionResult};
use super::ids::RequestTarget;
use super::language::LanguageCodeStyle;
use super::message::Role;
use super::session::{DEFAULT_PAGE_SIZE, RequestKind, SessionState};

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CONTEXT_WINDOW: usize = 5;

/// How the transport should read a reply body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Decide from the response `Content-Type`.
    #[default]
    Auto,
    Single,
    Stream,
}

/// Generation knobs forwarded to backends that expose them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
}

/// Everything needed to address and shape one backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub base_url: String,
    pub endpoint_path: String,
    pub timeout_ms: u64,
    pub llm_options: Option<LlmOptions>,
    pub response_mode: ResponseMode,
    pub language_style: LanguageCodeStyle,
    pub page_size: u32,
    /// Prior turns sent as `context`; zero disables it.
    pub context_window: usize,
}

impl RequestConfig {
    pub fn new(base_url: impl Into<String>, endpoint_path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint_path: endpoint_path.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            llm_options: None,
            response_mode: ResponseMode::Auto,
            language_style: LanguageCodeStyle::Name,
            page_size: DEFAULT_PAGE_SIZE,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// Base URL and path joined with exactly one slash.
    pub fn endpoint_url(&self) -> String {
        join_url(&self.base_url, &self.endpoint_path)
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextTurn {
    pub role: &'static str,
    pub content: String,
}

/// JSON body of a chat request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPayload {
    pub message: String,
    pub language: &'static str,
    pub session_id: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    pub llm_config: Option<LlmOptions>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextTurn>,
    pub require_translation: bool,
    pub include_language_suggestions: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub target: RequestTarget,
    pub kind: RequestKind,
    pub payload: QueryPayload,
}

/// Builds the body for a fresh question. Call before appending the user message.
pub fn build_query(
    input: &str,
    state: &SessionState,
    config: &RequestConfig,
) -> SessionResult<BuiltRequest> {
    let message = input.trim();
    if message.is_empty() {
        return EmptyQuerySnafu {
            stage: "build-query",
        }
        .fail();
    }

    let target = RequestTarget::next(state.session_id());
    let payload = payload(
        message.to_string(),
        target,
        None,
        context_turns(state, config.context_window),
        state,
        config,
    );
    Ok(BuiltRequest {
        target,
        kind: RequestKind::Query,
        payload,
    })
}

/// Builds the continuation of the last query at the next page.
pub fn build_show_more(state: &SessionState, config: &RequestConfig) -> SessionResult<BuiltRequest> {
    let query = state.last_query().context(NoPriorQuerySnafu {
        stage: "build-show-more",
    })?;

    let page = state.pagination().page.saturating_add(1);
    let target = RequestTarget::next(state.session_id());
    let payload = payload(
        query.to_string(),
        target,
        Some(page),
        Vec::new(),
        state,
        config,
    );
    Ok(BuiltRequest {
        target,
        kind: RequestKind::ShowMore { page },
        payload,
    })
}

fn payload(
    message: String,
    target: RequestTarget,
    page: Option<u32>,
    context: Vec<ContextTurn>,
    state: &SessionState,
    config: &RequestConfig,
) -> QueryPayload {
    let language = state.language();
    QueryPayload {
        message,
        language: language.wire_code(config.language_style),
        session_id: target.session_id.to_string(),
        request_id: target.request_id.to_string(),
        page,
        page_size: page.map(|_| state.pagination().page_size),
        llm_config: config.llm_options.clone(),
        context,
        require_translation: language.locale().requires_translation,
        include_language_suggestions: true,
    }
}

// Completed user/assistant turns after the first user message, newest last.
fn context_turns(state: &SessionState, window: usize) -> Vec<ContextTurn> {
    if window == 0 {
        return Vec::new();
    }

    let turns: Vec<ContextTurn> = state
        .messages()
        .iter()
        .skip_while(|message| message.role != Role::User)
        .filter(|message| !message.is_streaming)
        .filter_map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System | Role::Error => return None,
            };
            Some(ContextTurn {
                role,
                content: message.text.clone(),
            })
        })
        .collect();

    let skip = turns.len().saturating_sub(window);
    turns.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::language::Language;
    use crate::session::Completion;

    fn config() -> RequestConfig {
        RequestConfig::new("http://localhost:8000/", "/api/rag-sql-chatbot/chat")
    }

    #[test]
    fn endpoint_url_joins_with_one_slash() {
        assert_eq!(
            config().endpoint_url(),
            "http://localhost:8000/api/rag-sql-chatbot/chat"
        );
        assert_eq!(join_url("http://a", ""), "http://a");
    }

    #[test]
    fn blank_input_is_rejected() {
        let state = SessionState::new(Language::English, DEFAULT_PAGE_SIZE);
        let error = build_query("   \n", &state, &config()).unwrap_err();
        assert!(matches!(error, SessionError::EmptyQuery { .. }));
        assert!(error.is_validation());
    }

    #[test]
    fn query_payload_carries_language_session_and_translation_flag() {
        let state = SessionState::new(Language::Uzbek, DEFAULT_PAGE_SIZE);
        let built = build_query("  loyihalar?  ", &state, &config()).unwrap();

        assert_eq!(built.kind, RequestKind::Query);
        assert_eq!(built.target.session_id, state.session_id());
        let json = serde_json::to_value(&built.payload).unwrap();
        assert_eq!(json["message"], "loyihalar?");
        assert_eq!(json["language"], "uzbek");
        assert_eq!(json["session_id"], state.session_id().to_string());
        assert_eq!(json["require_translation"], true);
        assert_eq!(json["include_language_suggestions"], true);
        assert!(json["llm_config"].is_null());
        assert!(json.get("page").is_none());
        assert!(json.get("context").is_none());
    }

    #[test]
    fn iso_style_and_llm_options_are_forwarded() {
        let state = SessionState::new(Language::Russian, DEFAULT_PAGE_SIZE);
        let mut config = config();
        config.language_style = LanguageCodeStyle::Iso;
        config.llm_options = Some(LlmOptions {
            temperature: Some(0.7),
            max_tokens: Some(1500),
            ..LlmOptions::default()
        });

        let json = serde_json::to_value(build_query("q", &state, &config).unwrap().payload).unwrap();
        assert_eq!(json["language"], "ru");
        assert_eq!(json["llm_config"]["max_tokens"], 1500);
        assert!(json["llm_config"].get("model").is_none());
    }

    #[test]
    fn show_more_requires_a_previous_query() {
        let state = SessionState::new(Language::English, DEFAULT_PAGE_SIZE);
        let error = build_show_more(&state, &config()).unwrap_err();
        assert!(matches!(error, SessionError::NoPriorQuery { .. }));
    }

    #[test]
    fn show_more_targets_the_next_page_of_the_last_query() {
        let mut state = SessionState::new(Language::English, DEFAULT_PAGE_SIZE);
        state.record_query("projects");

        let built = build_show_more(&state, &config()).unwrap();
        assert_eq!(built.kind, RequestKind::ShowMore { page: 2 });
        assert_eq!(built.payload.message, "projects");
        assert_eq!(built.payload.page, Some(2));
        assert_eq!(built.payload.page_size, Some(DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn context_holds_recent_completed_turns_only() {
        let mut state = SessionState::new(Language::English, DEFAULT_PAGE_SIZE);
        for round in 0..4 {
            state.append_user_message(format!("q{round}"));
            let target = RequestTarget::next(state.session_id());
            state.begin_request(target, RequestKind::Query).unwrap();
            state
                .finalize_assistant_message(
                    target,
                    Completion {
                        text: Some(format!("a{round}")),
                        ..Completion::default()
                    },
                )
                .unwrap();
        }

        let built = build_query("next", &state, &config()).unwrap();
        let contents: Vec<&str> = built
            .payload
            .context
            .iter()
            .map(|turn| turn.content.as_str())
            .collect();
        assert_eq!(contents, vec!["a1", "q2", "a2", "q3", "a3"]);
        assert_eq!(built.payload.context[0].role, "assistant");
    }
}
