use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use snafu::ResultExt;

use super::error::{
    BackendReportedSnafu, InvalidPayloadSnafu, MissingAnswerSnafu, SessionResult,
};
use super::ids::{MessageId, RequestTarget};
use super::language::Language;
use super::message::Source;
use super::session::{Completion, PaginationUpdate, SessionState};

/// Answer field aliases, in priority order.
pub const ANSWER_FIELDS: &str = "response, answer, content, text";

const DEFAULT_SOURCE_TITLE: &str = "Document";
const STREAM_DATA_PREFIX: &str = "data:";
const STREAM_DONE_MARKER: &str = "[DONE]";

// Fields are read leniently: a mistyped value reads as absent.
#[derive(Debug, Default, Deserialize)]
struct WireReply {
    #[serde(default, deserialize_with = "lenient")]
    response: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    answer: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    text: Option<String>,
    sources: Option<Value>,
    suggested_questions: Option<Value>,
    suggested_questions_ru: Option<Value>,
    suggested_questions_uz: Option<Value>,
    metadata: Option<Value>,
    error: Option<Value>,
    detail: Option<Value>,
    done: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct WireSource {
    #[serde(default, deserialize_with = "lenient")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    citation: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    page_content: Option<String>,
    page_number: Option<Value>,
    is_clickable: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    metadata: Option<WireSourceMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct WireSourceMetadata {
    #[serde(default, deserialize_with = "lenient")]
    title: Option<String>,
    page_number: Option<Value>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// One backend payload after alias normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fragment {
    pub text: Option<String>,
    pub sources: Option<Vec<Source>>,
    /// Already resolved for the session language; `None` when the backend sent none.
    pub suggested_questions: Option<Vec<String>>,
    pub pagination: Option<PaginationUpdate>,
    pub backend_error: Option<String>,
    pub terminal: bool,
}

impl Fragment {
    /// Builds the final completion, falling back to the static suggestions for `language`.
    pub fn into_completion(self, language: Language) -> Completion {
        Completion {
            text: self.text,
            sources: self.sources,
            suggested_questions: self
                .suggested_questions
                .unwrap_or_else(|| language.locale().suggestion_list()),
            pagination: self.pagination,
        }
    }
}

/// Parses one JSON document into a [`Fragment`] without requiring an answer.
pub fn normalize_fragment(raw: &str, language: Language) -> SessionResult<Fragment> {
    let wire: WireReply = serde_json::from_str(raw).context(InvalidPayloadSnafu {
        stage: "normalize-fragment",
    })?;
    Ok(fragment_from_wire(wire, language))
}

/// Parses a single-shot reply; fails when no answer alias carries text.
pub fn normalize_reply(raw: &str, language: Language) -> SessionResult<Fragment> {
    let fragment = normalize_fragment(raw, language)?;
    if fragment.text.is_some() {
        return Ok(fragment);
    }

    match fragment.backend_error {
        Some(message) => BackendReportedSnafu {
            stage: "normalize-reply",
            message,
        }
        .fail(),
        None => MissingAnswerSnafu {
            stage: "normalize-reply",
            fields: ANSWER_FIELDS,
        }
        .fail(),
    }
}

/// Merges a single-shot reply into the pending assistant message.
pub fn apply_reply(
    state: &mut SessionState,
    target: RequestTarget,
    raw: &str,
) -> SessionResult<MessageId> {
    let language = state.language();
    let fragment = normalize_reply(raw, language)?;
    state.finalize_assistant_message(target, fragment.into_completion(language))
}

/// Result of folding one stream line into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Applied(MessageId),
    /// Blank line or keep-alive.
    Ignored,
    /// Malformed or answerless chunk; the stream goes on.
    Skipped,
    /// Terminal marker seen; the caller finalizes with [`StreamReconciler::completion`].
    Terminal,
    /// The backend reported an error inside the stream.
    Failed(String),
}

/// Folds full-replacement stream snapshots into one pending message.
#[derive(Debug, Clone, Default)]
pub struct StreamReconciler {
    applied: usize,
    skipped: usize,
    suggested_questions: Option<Vec<String>>,
    pagination: Option<PaginationUpdate>,
}

impl StreamReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn apply_line(
        &mut self,
        state: &mut SessionState,
        target: RequestTarget,
        line: &str,
    ) -> SessionResult<ChunkOutcome> {
        let payload = strip_stream_framing(line);
        if payload.is_empty() {
            return Ok(ChunkOutcome::Ignored);
        }
        if payload == STREAM_DONE_MARKER {
            return Ok(ChunkOutcome::Terminal);
        }

        let fragment = match normalize_fragment(payload, state.language()) {
            Ok(fragment) => fragment,
            Err(error) => {
                self.skipped += 1;
                tracing::warn!(
                    request = %target,
                    error = %error,
                    "skipping malformed stream chunk"
                );
                return Ok(ChunkOutcome::Skipped);
            }
        };

        if fragment.suggested_questions.is_some() {
            self.suggested_questions = fragment.suggested_questions.clone();
        }
        if fragment.pagination.is_some() {
            self.pagination = fragment.pagination;
        }

        let has_body = fragment.text.is_some() || fragment.sources.is_some();
        if !has_body {
            if let Some(message) = fragment.backend_error {
                return Ok(ChunkOutcome::Failed(message));
            }
            if fragment.terminal {
                return Ok(ChunkOutcome::Terminal);
            }
            self.skipped += 1;
            tracing::debug!(request = %target, "skipping stream chunk without answer or sources");
            return Ok(ChunkOutcome::Skipped);
        }

        let current_text = state
            .pending_message_id()
            .and_then(|id| state.message(id))
            .map(|message| message.text.clone())
            .unwrap_or_default();
        let text = fragment.text.unwrap_or(current_text);
        let id = state.apply_snapshot(target, text, fragment.sources)?;
        self.applied += 1;

        if fragment.terminal {
            return Ok(ChunkOutcome::Terminal);
        }
        Ok(ChunkOutcome::Applied(id))
    }

    /// Completion for stream end: keeps streamed text and sources.
    pub fn completion(&self, language: Language) -> Completion {
        Completion {
            text: None,
            sources: None,
            suggested_questions: self
                .suggested_questions
                .clone()
                .unwrap_or_else(|| language.locale().suggestion_list()),
            pagination: self.pagination,
        }
    }
}

fn strip_stream_framing(line: &str) -> &str {
    let trimmed = line.trim();
    trimmed
        .strip_prefix(STREAM_DATA_PREFIX)
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn fragment_from_wire(wire: WireReply, language: Language) -> Fragment {
    let text = [wire.response, wire.answer, wire.content, wire.text]
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.trim().is_empty());

    // A non-English session never shows the generic (English) list.
    let suggested_questions = match language {
        Language::English => wire.suggested_questions,
        Language::Russian => wire.suggested_questions_ru,
        Language::Uzbek => wire.suggested_questions_uz,
    }
    .map(|value| string_list(&value))
    .filter(|questions| !questions.is_empty());

    let pagination = wire.metadata.as_ref().and_then(pagination_from_value);

    let backend_error = [wire.error, wire.detail]
        .into_iter()
        .flatten()
        .find_map(|value| error_text(&value));

    Fragment {
        text,
        sources: wire.sources.as_ref().and_then(sources_from_value),
        suggested_questions,
        pagination,
        backend_error,
        terminal: wire.done.as_ref().and_then(flag).unwrap_or(false),
    }
}

fn sources_from_value(value: &Value) -> Option<Vec<Source>> {
    let entries = value.as_array()?;
    Some(entries.iter().filter_map(source_from_value).collect())
}

// Strings are bare excerpts; anything that is neither string nor object is dropped.
fn source_from_value(entry: &Value) -> Option<Source> {
    let wire = match entry {
        Value::String(content) => WireSource {
            content: Some(content.clone()),
            ..WireSource::default()
        },
        Value::Object(_) => WireSource::deserialize(entry).ok()?,
        _ => return None,
    };
    Some(source_from_wire(wire))
}

fn source_from_wire(wire: WireSource) -> Source {
    let metadata = wire.metadata.unwrap_or_default();

    let title = metadata
        .title
        .or(wire.title)
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SOURCE_TITLE.to_string());
    let location = metadata
        .page_number
        .or(wire.page_number)
        .and_then(|value| scalar_text(&value));
    let content = wire.page_content.or(wire.content).unwrap_or_default();

    let url = wire.url.filter(|url| is_web_url(url));
    let clickable = url.is_some() && wire.is_clickable.as_ref().and_then(flag).unwrap_or(true);

    Source {
        title,
        citation: wire.citation,
        content,
        location,
        clickable,
        url,
    }
}

fn is_web_url(url: &str) -> bool {
    let lowered = url.trim().to_ascii_lowercase();
    lowered.starts_with("https://") || lowered.starts_with("http://")
}

fn pagination_from_value(value: &Value) -> Option<PaginationUpdate> {
    let metadata = value.as_object()?;
    let count = |key: &str| metadata.get(key).and_then(whole_number);
    let page = |key: &str| count(key).and_then(|number| u32::try_from(number).ok());
    Some(PaginationUpdate {
        current_page: page("current_page"),
        total_results: count("total_results"),
        total_pages: page("total_pages"),
        has_more: metadata.get("has_more").and_then(flag),
    })
}

/// Non-negative integer from a JSON number (`50`, `50.0`) or numeric string (`"50"`).
fn whole_number(value: &Value) -> Option<u64> {
    let float = match value {
        Value::Number(number) => {
            if let Some(whole) = number.as_u64() {
                return Some(whole);
            }
            number.as_f64()?
        }
        Value::String(text) => {
            let text = text.trim();
            if let Ok(whole) = text.parse::<u64>() {
                return Some(whole);
            }
            text.parse::<f64>().ok()?
        }
        _ => return None,
    };
    (float.is_finite() && float >= 0.0 && float.fract() == 0.0 && float <= u64::MAX as f64)
        .then_some(float as u64)
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|number| number != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Human-readable text for an `error`/`detail` value; validation lists are joined.
pub fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.trim().to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(object) => object.get("msg").and_then(error_text),
                    other => error_text(other),
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        Value::Object(object) => object
            .get("message")
            .or_else(|| object.get("detail"))
            .and_then(error_text),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::session::{DEFAULT_PAGE_SIZE, RequestKind};

    fn pending(state: &mut SessionState) -> RequestTarget {
        let target = RequestTarget::next(state.session_id());
        state.begin_request(target, RequestKind::Query).unwrap();
        state.append_pending_assistant_message(target).unwrap();
        target
    }

    #[test]
    fn single_shot_answer_with_metadata_lands_in_session() {
        let mut state = SessionState::new(Language::English, DEFAULT_PAGE_SIZE);
        state.append_user_message("projects?");
        let target = pending(&mut state);

        let id = apply_reply(
            &mut state,
            target,
            r#"{"answer":"X","metadata":{"has_more":true,"current_page":1,"total_results":50}}"#,
        )
        .unwrap();

        let message = state.message(id).unwrap();
        assert_eq!(message.text, "X");
        assert!(!message.is_streaming);
        let pagination = state.pagination();
        assert_eq!(pagination.page, 1);
        assert!(pagination.has_more);
        assert_eq!(pagination.total_results, 50);
    }

    #[test]
    fn missing_suggestions_fall_back_to_static_list() {
        let mut state = SessionState::new(Language::Uzbek, DEFAULT_PAGE_SIZE);
        let target = pending(&mut state);

        apply_reply(&mut state, target, r#"{"response":"ok"}"#).unwrap();

        assert_eq!(
            state.suggestions().to_vec(),
            Language::Uzbek.locale().suggestion_list()
        );
    }

    #[test]
    fn localized_suggestion_alias_wins() {
        let fragment = normalize_reply(
            r#"{"response":"ok","suggested_questions":["en"],"suggested_questions_ru":["ru"]}"#,
            Language::Russian,
        )
        .unwrap();
        assert_eq!(fragment.suggested_questions, Some(vec!["ru".to_string()]));

        let fragment = normalize_reply(
            r#"{"response":"ok","suggested_questions":["en"],"suggested_questions_ru":["ru"]}"#,
            Language::English,
        )
        .unwrap();
        assert_eq!(fragment.suggested_questions, Some(vec!["en".to_string()]));
    }

    #[test]
    fn answer_aliases_are_tried_in_order() {
        let fragment = normalize_reply(r#"{"response":"","answer":"a","text":"t"}"#, Language::English)
            .unwrap();
        assert_eq!(fragment.text.as_deref(), Some("a"));
    }

    #[test]
    fn reply_without_answer_fails_loudly() {
        let error = normalize_reply(r#"{"sources":[]}"#, Language::English).unwrap_err();
        assert!(matches!(error, SessionError::MissingAnswer { .. }));

        let error =
            normalize_reply(r#"{"detail":"index not ready"}"#, Language::English).unwrap_err();
        assert!(matches!(
            error,
            SessionError::BackendReported { ref message, .. } if message == "index not ready"
        ));
    }

    #[test]
    fn sources_are_normalized_and_untrusted_urls_are_not_clickable() {
        let fragment = normalize_reply(
            r#"{
                "response": "see sources",
                "sources": [
                    {"metadata": {"title": "Manual", "page_number": 4}, "page_content": "excerpt"},
                    {"title": "Site", "citation": "[1]", "content": "c", "is_clickable": true, "url": "https://example.org/doc"},
                    {"title": "Bad", "is_clickable": true, "url": "javascript:alert(1)"},
                    "plain context"
                ]
            }"#,
            Language::English,
        )
        .unwrap();

        let sources = fragment.sources.unwrap();
        assert_eq!(sources[0].title, "Manual");
        assert_eq!(sources[0].location.as_deref(), Some("4"));
        assert_eq!(sources[0].content, "excerpt");
        assert!(!sources[0].clickable);
        assert_eq!(sources[1].link(), Some("https://example.org/doc"));
        assert!(!sources[2].clickable);
        assert!(sources[2].url.is_none());
        assert_eq!(sources[3].title, "Document");
        assert_eq!(sources[3].content, "plain context");
    }

    #[test]
    fn malformed_middle_chunk_is_skipped_without_aborting() {
        let mut state = SessionState::new(Language::English, DEFAULT_PAGE_SIZE);
        let target = pending(&mut state);
        let mut reconciler = StreamReconciler::new();

        let lines = [
            r#"{"response":"Hel","sources":[{"title":"A","content":"a"}]}"#,
            r#"{"response":"Hel"#,
            r#"{"response":"Hello"}"#,
        ];
        let outcomes: Vec<ChunkOutcome> = lines
            .iter()
            .map(|line| reconciler.apply_line(&mut state, target, line).unwrap())
            .collect();

        assert!(matches!(outcomes[0], ChunkOutcome::Applied(_)));
        assert_eq!(outcomes[1], ChunkOutcome::Skipped);
        assert!(matches!(outcomes[2], ChunkOutcome::Applied(_)));
        assert_eq!(reconciler.applied(), 2);
        assert_eq!(reconciler.skipped(), 1);

        let id = state
            .finalize_assistant_message(target, reconciler.completion(Language::English))
            .unwrap();
        let message = state.message(id).unwrap();
        assert_eq!(message.text, "Hello");
        assert_eq!(message.sources.len(), 1);
        assert_eq!(message.sources[0].title, "A");
        assert!(!message.is_streaming);
    }

    #[test]
    fn stream_markers_and_framing_are_understood() {
        let mut state = SessionState::new(Language::English, DEFAULT_PAGE_SIZE);
        let target = pending(&mut state);
        let mut reconciler = StreamReconciler::new();

        assert_eq!(
            reconciler.apply_line(&mut state, target, "   ").unwrap(),
            ChunkOutcome::Ignored
        );
        assert!(matches!(
            reconciler
                .apply_line(&mut state, target, r#"data: {"content":"hi"}"#)
                .unwrap(),
            ChunkOutcome::Applied(_)
        ));
        assert_eq!(
            reconciler
                .apply_line(&mut state, target, r#"{"done":true}"#)
                .unwrap(),
            ChunkOutcome::Terminal
        );
        assert_eq!(
            reconciler.apply_line(&mut state, target, "data: [DONE]").unwrap(),
            ChunkOutcome::Terminal
        );
        assert_eq!(
            reconciler
                .apply_line(&mut state, target, r#"{"error":"model overloaded"}"#)
                .unwrap(),
            ChunkOutcome::Failed("model overloaded".to_string())
        );
    }

    #[test]
    fn error_text_flattens_validation_details() {
        let value: Value = serde_json::from_str(
            r#"[{"loc":["body","message"],"msg":"field required"},{"msg":"too short"}]"#,
        )
        .unwrap();
        assert_eq!(
            error_text(&value).as_deref(),
            Some("field required; too short")
        );
    }

    #[test]
    fn odd_optional_fields_do_not_discard_the_answer() {
        let fragment = normalize_reply(
            r#"{"answer":"X","metadata":{"has_more":true,"current_page":1,"total_results":50.0}}"#,
            Language::English,
        )
        .unwrap();
        assert_eq!(fragment.text.as_deref(), Some("X"));
        assert_eq!(fragment.pagination.unwrap().total_results, Some(50));

        let fragment = normalize_reply(
            r#"{"answer":"X","metadata":{"current_page":"2","total_pages":"abc"}}"#,
            Language::English,
        )
        .unwrap();
        let pagination = fragment.pagination.unwrap();
        assert_eq!(pagination.current_page, Some(2));
        assert_eq!(pagination.total_pages, None);

        let fragment = normalize_reply(
            r#"{"answer":"X","sources":[null,7,{"title":3,"content":"kept"},"plain"]}"#,
            Language::English,
        )
        .unwrap();
        let sources = fragment.sources.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "Document");
        assert_eq!(sources[0].content, "kept");
        assert_eq!(sources[1].content, "plain");

        let fragment = normalize_reply(r#"{"answer":"X","done":"no"}"#, Language::English).unwrap();
        assert!(!fragment.terminal);

        let fragment =
            normalize_reply(r#"{"answer":"X","metadata":"n/a","sources":{}}"#, Language::English)
                .unwrap();
        assert_eq!(fragment.text.as_deref(), Some("X"));
        assert!(fragment.pagination.is_none());
        assert!(fragment.sources.is_none());
    }

    #[test]
    fn non_english_session_never_takes_generic_suggestions() {
        let mut state = SessionState::new(Language::Russian, DEFAULT_PAGE_SIZE);
        let target = pending(&mut state);

        apply_reply(
            &mut state,
            target,
            r#"{"response":"ok","suggested_questions":["en"],"suggested_questions_ru":[]}"#,
        )
        .unwrap();
        assert_eq!(
            state.suggestions().to_vec(),
            Language::Russian.locale().suggestion_list()
        );

        let fragment = normalize_reply(
            r#"{"response":"ok","suggested_questions":["en"]}"#,
            Language::Uzbek,
        )
        .unwrap();
        assert_eq!(fragment.suggested_questions, None);
    }
}
