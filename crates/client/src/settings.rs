use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use ragchat_core::{Language, LanguageCodeStyle, LlmOptions, ResponseMode};
use ragchat_core::request::{DEFAULT_CONTEXT_WINDOW, DEFAULT_TIMEOUT_MS};
use ragchat_core::session::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::endpoint::ServiceKind;
use crate::error::{
    ClientResult, CreateDirSnafu, LoadSettingsSnafu, RenameTempFileSnafu, SerializeSettingsSnafu,
    WriteFileSnafu,
};

pub const SETTINGS_DIRECTORY_NAME: &str = "ragchat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "RAGCHAT_";

pub const DEVELOPMENT_BASE_URL: &str = "http://localhost:8000";
pub const TESTING_BASE_URL: &str = "http://154.0.164.254:8000";
pub const PRODUCTION_BASE_URL: &str = "https://ai.kwantu.support";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    pub base_url: String,
    /// Hostnames that select this environment when none is named explicitly.
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl EnvironmentSettings {
    fn new(base_url: &str, hosts: &[&str]) -> Self {
        Self {
            base_url: base_url.to_string(),
            hosts: hosts.iter().map(|host| host.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Prefix under the environment base URL, e.g. `/api/rag-sql-chatbot`.
    pub path: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default)]
    pub language_style: LanguageCodeStyle,
    #[serde(default = "default_upload_field")]
    pub upload_field: String,
}

impl ServiceSettings {
    fn new(path: &str, language_style: LanguageCodeStyle, upload_field: &str) -> Self {
        Self {
            path: path.to_string(),
            chat_path: default_chat_path(),
            language_style,
            upload_field: upload_field.to_string(),
        }
    }
}

/// Per-service routing, one entry per backend family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesSettings {
    pub pdf: ServiceSettings,
    pub sql: ServiceSettings,
    pub nlp: ServiceSettings,
}

impl Default for ServicesSettings {
    fn default() -> Self {
        Self {
            pdf: ServiceSettings::new("/api/rag-pdf-chatbot", LanguageCodeStyle::Iso, "files"),
            sql: ServiceSettings::new("/api/rag-sql-chatbot", LanguageCodeStyle::Name, "file"),
            nlp: ServiceSettings::new("/api/nlp", LanguageCodeStyle::Name, "file"),
        }
    }
}

impl ServicesSettings {
    pub fn get(&self, kind: ServiceKind) -> &ServiceSettings {
        match kind {
            ServiceKind::Pdf => &self.pdf,
            ServiceKind::Sql => &self.sql,
            ServiceKind::Nlp => &self.nlp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Environment name; hostname matching applies when unset.
    #[serde(default)]
    pub environment: Option<String>,
    /// Replaces the environment base URL for every service.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_environments")]
    pub environments: BTreeMap<String, EnvironmentSettings>,
    #[serde(default)]
    pub services: ServicesSettings,
    #[serde(default)]
    pub language: Language,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default)]
    pub llm: Option<LlmOptions>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            environment: None,
            base_url: None,
            environments: default_environments(),
            services: ServicesSettings::default(),
            language: Language::default(),
            timeout_ms: default_timeout_ms(),
            health_timeout_ms: default_health_timeout_ms(),
            response_mode: ResponseMode::default(),
            page_size: default_page_size(),
            context_window: default_context_window(),
            llm: None,
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.environment = self
            .environment
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty());
        self.base_url = self
            .base_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        for environment in self.environments.values_mut() {
            environment.base_url = environment.base_url.trim().to_string();
            environment.hosts = environment
                .hosts
                .iter()
                .map(|host| host.trim().to_lowercase())
                .filter(|host| !host.is_empty())
                .collect();
        }
        self.page_size = self.page_size.max(1);
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".ragchat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads defaults, then the JSON file if present, then `RAGCHAT_*` variables.
    pub fn open(config_path: PathBuf) -> ClientResult<Self> {
        let settings = Self::load_layers(&config_path, true)?;
        Ok(Self::with_settings(settings, config_path))
    }

    pub fn load() -> ClientResult<Self> {
        Self::open(Self::default_config_path())
    }

    pub fn with_settings(settings: ClientSettings, config_path: PathBuf) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings.normalized())),
            config_path,
        }
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update(&self, settings: ClientSettings) -> ClientResult<()> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_layers(path: &Path, with_env: bool) -> ClientResult<ClientSettings> {
        let mut figment = Figment::from(Serialized::defaults(ClientSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }
        if with_env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        let settings = figment
            .extract::<ClientSettings>()
            .context(LoadSettingsSnafu {
                stage: "extract-settings",
                path: path.to_path_buf(),
            })?;
        Ok(settings.normalized())
    }

    fn persist(&self, settings: &ClientSettings) -> ClientResult<()> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeSettingsSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

fn default_environments() -> BTreeMap<String, EnvironmentSettings> {
    BTreeMap::from([
        (
            "development".to_string(),
            EnvironmentSettings::new(DEVELOPMENT_BASE_URL, &["localhost", "127.0.0.1"]),
        ),
        (
            "testing".to_string(),
            EnvironmentSettings::new(TESTING_BASE_URL, &["154.0.164.254"]),
        ),
        (
            "qa".to_string(),
            EnvironmentSettings::new(PRODUCTION_BASE_URL, &[]),
        ),
        (
            "production".to_string(),
            EnvironmentSettings::new(PRODUCTION_BASE_URL, &["ai.kwantu.support"]),
        ),
    ])
}

fn default_chat_path() -> String {
    "/query".to_string()
}

fn default_upload_field() -> String {
    "file".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_health_timeout_ms() -> u64 {
    5_000
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_context_window() -> usize {
    DEFAULT_CONTEXT_WINDOW
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_service_and_environment() {
        let settings = ClientSettings::default();
        assert_eq!(settings.services.get(ServiceKind::Pdf).upload_field, "files");
        assert_eq!(settings.services.get(ServiceKind::Pdf).language_style, LanguageCodeStyle::Iso);
        assert_eq!(settings.services.sql.chat_path, "/query");
        assert_eq!(
            settings.environments["production"].base_url,
            PRODUCTION_BASE_URL
        );
        assert_eq!(settings.timeout_ms, 60_000);
    }

    #[test]
    fn json_file_overrides_defaults_and_keeps_unnamed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{
                "environment": " QA ",
                "language": "russian",
                "timeout_ms": 1500,
                "services": {"sql": {"path": "/api/sql-v2"}},
                "environments": {"staging": {"base_url": "https://staging.example"}}
            }"#,
        )
        .unwrap();

        let settings = SettingsStore::load_layers(&path, false).unwrap();
        assert_eq!(settings.environment.as_deref(), Some("qa"));
        assert_eq!(settings.language, Language::Russian);
        assert_eq!(settings.timeout_ms, 1500);
        assert!(settings.environments.contains_key("staging"));
        assert!(settings.environments.contains_key("development"));
        assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(settings.services.sql.path, "/api/sql-v2");
        assert_eq!(settings.services.pdf.path, "/api/rag-pdf-chatbot");
    }

    #[test]
    fn malformed_settings_fail_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"timeout_ms": "soon"}"#).unwrap();

        let error = SettingsStore::load_layers(&path, false).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn update_persists_and_swaps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore::with_settings(ClientSettings::default(), path.clone());

        let mut settings = ClientSettings::clone(&store.settings());
        settings.language = Language::Uzbek;
        store.update(settings).unwrap();

        assert_eq!(store.settings().language, Language::Uzbek);
        let reloaded = SettingsStore::load_layers(&path, false).unwrap();
        assert_eq!(reloaded.language, Language::Uzbek);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
