use std::fmt;

use ragchat_core::request::join_url;
use ragchat_core::{LanguageCodeStyle, RequestConfig};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use url::Url;

use crate::error::{
    ClientResult, InvalidBaseUrlSnafu, NoEnvironmentSnafu, UnknownEnvironmentSnafu,
    UnsupportedSchemeSnafu,
};
use crate::settings::ClientSettings;

/// Backend family a chat widget talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Document question answering over uploaded PDFs.
    Pdf,
    /// Natural-language questions over the projects database.
    Sql,
    /// Text analysis (summaries, topics, sentiment).
    Nlp,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Pdf, ServiceKind::Sql, ServiceKind::Nlp];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Sql => "sql",
            Self::Nlp => "nlp",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.pad(self.name())
    }
}

/// Where the client is running and what the caller asked for explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentContext {
    pub environment: Option<String>,
    pub hostname: Option<String>,
    pub base_url: Option<String>,
}

impl DeploymentContext {
    pub fn for_host(hostname: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub kind: ServiceKind,
    /// Environment base URL joined with the service prefix.
    pub url: String,
    pub chat_path: String,
    pub upload_field: String,
    pub language_style: LanguageCodeStyle,
}

impl ResolvedService {
    pub fn chat_url(&self) -> String {
        join_url(&self.url, &self.chat_path)
    }

    pub fn upload_url(&self) -> String {
        join_url(&self.url, "upload")
    }

    pub fn status_url(&self) -> String {
        join_url(&self.url, "status")
    }

    pub fn analyze_url(&self) -> String {
        join_url(&self.url, "analyze")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEndpoints {
    /// `None` when an explicit base URL bypassed environment selection.
    pub environment: Option<String>,
    pub base_url: String,
    services: Vec<ResolvedService>,
    request_defaults: RequestConfig,
}

impl ResolvedEndpoints {
    pub fn service(&self, kind: ServiceKind) -> &ResolvedService {
        // Every kind is resolved up front.
        let index = ServiceKind::ALL
            .iter()
            .position(|candidate| *candidate == kind)
            .unwrap_or_default();
        &self.services[index]
    }

    pub fn services(&self) -> &[ResolvedService] {
        &self.services
    }

    /// Request settings for the chat endpoint of `kind`.
    pub fn request_config(&self, kind: ServiceKind) -> RequestConfig {
        let service = self.service(kind);
        RequestConfig {
            base_url: service.url.clone(),
            endpoint_path: service.chat_path.clone(),
            language_style: service.language_style,
            ..self.request_defaults.clone()
        }
    }
}

pub struct EndpointResolver<'a> {
    settings: &'a ClientSettings,
}

impl<'a> EndpointResolver<'a> {
    pub fn new(settings: &'a ClientSettings) -> Self {
        Self { settings }
    }

    /// Picks one base URL and derives every service URL from it.
    ///
    /// Order: context URL, settings URL, then the selected environment. The
    /// environment comes from the context, then settings, then hostname match.
    pub fn resolve(&self, context: &DeploymentContext) -> ClientResult<ResolvedEndpoints> {
        let override_url = context
            .base_url
            .as_deref()
            .or(self.settings.base_url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty());

        let (environment, base_url) = match override_url {
            Some(url) => (None, url.to_string()),
            None => {
                let (name, base_url) = self.select_environment(context)?;
                (Some(name), base_url)
            }
        };

        let base_url = validate_base_url(&base_url)?;
        let services = ServiceKind::ALL
            .iter()
            .map(|kind| {
                let settings = self.settings.services.get(*kind);
                ResolvedService {
                    kind: *kind,
                    url: join_url(&base_url, &settings.path),
                    chat_path: settings.chat_path.clone(),
                    upload_field: settings.upload_field.clone(),
                    language_style: settings.language_style,
                }
            })
            .collect();

        tracing::info!(
            environment = environment.as_deref().unwrap_or("override"),
            base_url = %base_url,
            "resolved service endpoints"
        );

        let mut request_defaults = RequestConfig::new(base_url.clone(), String::new());
        request_defaults.timeout_ms = self.settings.timeout_ms;
        request_defaults.llm_options = self.settings.llm.clone();
        request_defaults.response_mode = self.settings.response_mode;
        request_defaults.page_size = self.settings.page_size;
        request_defaults.context_window = self.settings.context_window;

        Ok(ResolvedEndpoints {
            environment,
            base_url,
            services,
            request_defaults,
        })
    }

    fn select_environment(&self, context: &DeploymentContext) -> ClientResult<(String, String)> {
        let explicit = context
            .environment
            .as_deref()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .or_else(|| self.settings.environment.clone());

        if let Some(name) = explicit {
            if let Some(environment) = self.settings.environments.get(&name) {
                return Ok((name, environment.base_url.clone()));
            }
            return UnknownEnvironmentSnafu {
                stage: "select-environment",
                name,
            }
            .fail();
        }

        let hostname = context
            .hostname
            .as_deref()
            .map(|host| host.trim().to_lowercase());
        let matched = hostname.as_deref().and_then(|host| {
            self.settings
                .environments
                .iter()
                .find(|(_, environment)| environment.hosts.iter().any(|known| known == host))
                .map(|(name, environment)| (name.clone(), environment.base_url.clone()))
        });

        matched.context(NoEnvironmentSnafu {
            stage: "match-hostname",
            hostname,
        })
    }
}

fn validate_base_url(raw: &str) -> ClientResult<String> {
    let parsed = Url::parse(raw).context(InvalidBaseUrlSnafu {
        stage: "parse-base-url",
        url: raw.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return UnsupportedSchemeSnafu {
            stage: "check-base-url-scheme",
            url: raw.to_string(),
        }
        .fail();
    }
    Ok(raw.trim_end_matches('/').to_string())
}
