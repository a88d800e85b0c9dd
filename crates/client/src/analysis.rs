use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ResultExt, ensure};

use crate::endpoint::ResolvedService;
use crate::error::{ClientError, ClientResult, EmptyTextSnafu, InvalidResponseSnafu};
use crate::http::error_detail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    Summarization,
    TopicAnalysis,
    SentimentAnalysis,
}

impl UseCase {
    pub const ALL: [UseCase; 3] = [
        UseCase::Summarization,
        UseCase::TopicAnalysis,
        UseCase::SentimentAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarization => "summarization",
            Self::TopicAnalysis => "topic_analysis",
            Self::SentimentAnalysis => "sentiment_analysis",
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    use_case: UseCase,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub use_case: UseCase,
    pub result: String,
    pub raw: Value,
}

pub async fn analyze(
    client: &reqwest::Client,
    service: &ResolvedService,
    text: &str,
    use_case: UseCase,
    timeout: Duration,
) -> ClientResult<Analysis> {
    let text = text.trim();
    ensure!(!text.is_empty(), EmptyTextSnafu { stage: "analyze" });

    let url = service.analyze_url();
    let started_at = Instant::now();
    let send = async {
        let response = client
            .post(&url)
            .json(&AnalyzeRequest { text, use_case })
            .send()
            .await
            .map_err(|error| ClientError::Network {
                stage: "send-analyze",
                message: error.to_string(),
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|error| ClientError::Network {
            stage: "read-analyze-response",
            message: error.to_string(),
        })?;
        if !status.is_success() {
            return Err(ClientError::Status {
                stage: "analyze-status",
                status: status.as_u16(),
                detail: error_detail(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            });
        }
        Ok(body)
    };

    let body = tokio::time::timeout(timeout, send)
        .await
        .map_err(|_| ClientError::Timeout {
            stage: "analyze",
            elapsed_ms: started_at.elapsed().as_millis() as u64,
        })??;

    let raw: Value = serde_json::from_str(&body).context(InvalidResponseSnafu {
        stage: "parse-analyze-response",
    })?;
    tracing::info!(
        use_case = %use_case,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "analysis finished"
    );
    Ok(Analysis {
        use_case,
        result: result_text(&raw),
        raw,
    })
}

fn result_text(raw: &Value) -> String {
    match raw.get("result") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        None => serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string()),
    }
}
