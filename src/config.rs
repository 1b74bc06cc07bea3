use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::commands::organize_pipeline::{
    PipelineLimits, DEFAULT_CLASSIFY_TIMEOUT, DEFAULT_CONCURRENCY, DEFAULT_STORAGE_TIMEOUT,
};
use crate::error::AppError;
use crate::models::operation::ClassificationMode;
use crate::services::classifier_service::{DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL};
use crate::services::organize_service::DEFAULT_FALLBACK_LABEL;
use crate::services::storage_service::DEFAULT_SNIPPET_CHARS;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_MODE: &str = "ORGANIZER_MODE";
const ENV_CONCURRENCY: &str = "ORGANIZER_CONCURRENCY";
const ENV_FALLBACK_LABEL: &str = "ORGANIZER_FALLBACK_LABEL";
const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    #[default]
    Keyword,
    Gemini,
}

impl std::str::FromStr for ClassifierBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" | "offline" => Ok(Self::Keyword),
            "gemini" => Ok(Self::Gemini),
            _ => Err(format!("unknown classifier backend: {s}")),
        }
    }
}

/// Extra keyword rule, written as `[[classifier.rules]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRuleConfig {
    pub pattern: String,
    pub folder: String,
    /// Position in the rule list; omitted rules go last.
    #[serde(default)]
    pub priority: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    pub model: String,
    pub endpoint: String,
    /// Environment variable holding the Gemini API key.
    pub api_key_env: String,
    pub rules: Vec<KeywordRuleConfig>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::Keyword,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    pub root: Option<PathBuf>,
    pub mode: ClassificationMode,
    pub fallback_label: String,
    pub concurrency: usize,
    pub classify_timeout_secs: u64,
    pub storage_timeout_secs: u64,
    pub snippet_chars: usize,
    pub classifier: ClassifierConfig,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            root: None,
            mode: ClassificationMode::default(),
            fallback_label: DEFAULT_FALLBACK_LABEL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            classify_timeout_secs: DEFAULT_CLASSIFY_TIMEOUT.as_secs(),
            storage_timeout_secs: DEFAULT_STORAGE_TIMEOUT.as_secs(),
            snippet_chars: DEFAULT_SNIPPET_CHARS,
            classifier: ClassifierConfig::default(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "drive-organizer", "drive-organizer")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

impl OrganizerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, AppError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `explicit` if given (it must exist), else the platform config file
    /// if present, else defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Self::from_toml_str(&text)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_MODE) {
            self.mode = mode.parse().map_err(AppError::Config)?;
        }
        if let Some(concurrency) = lookup(ENV_CONCURRENCY) {
            self.concurrency = concurrency.trim().parse().map_err(|_| {
                AppError::Config(format!("{ENV_CONCURRENCY} must be a number, got '{concurrency}'"))
            })?;
        }
        if let Some(label) = lookup(ENV_FALLBACK_LABEL) {
            self.fallback_label = label;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::Config("concurrency must be at least 1".to_string()));
        }
        if self.fallback_label.trim().is_empty() {
            return Err(AppError::Config("fallback_label must not be empty".to_string()));
        }
        if self.classify_timeout_secs == 0 || self.storage_timeout_secs == 0 {
            return Err(AppError::Config("timeouts must be at least one second".to_string()));
        }
        Ok(())
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.classifier.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn limits(&self) -> PipelineLimits {
        PipelineLimits {
            concurrency: self.concurrency,
            classify_timeout: Duration::from_secs(self.classify_timeout_secs),
            storage_timeout: Duration::from_secs(self.storage_timeout_secs),
            snippet_chars: self.snippet_chars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = OrganizerConfig::from_toml_str(
            r#"
            mode = "name-content"
            concurrency = 8

            [classifier]
            backend = "gemini"
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, ClassificationMode::NameAndContent);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.fallback_label, "Unsorted");
        assert_eq!(config.classifier.backend, ClassifierBackend::Gemini);
        assert_eq!(config.classifier.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.limits().classify_timeout, Duration::from_secs(30));
    }

    #[test]
    fn keyword_rules_table_is_read() {
        let config = OrganizerConfig::from_toml_str(
            r#"
            [[classifier.rules]]
            pattern = "recipe|ingredients"
            folder = "Cooking"
            priority = 0

            [[classifier.rules]]
            pattern = "boarding.?pass"
            folder = "Travel"
            "#,
        )
        .unwrap();

        assert_eq!(config.classifier.rules.len(), 2);
        assert_eq!(config.classifier.rules[0].folder, "Cooking");
        assert_eq!(config.classifier.rules[0].priority, Some(0));
        assert_eq!(config.classifier.rules[1].priority, None);
    }

    #[test]
    fn invalid_toml_and_values_are_config_errors() {
        assert!(matches!(
            OrganizerConfig::from_toml_str("concurrency = \"lots\""),
            Err(AppError::ConfigParse(_))
        ));
        assert!(matches!(
            OrganizerConfig::from_toml_str("concurrency = 0"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = OrganizerConfig::default();
        let env = HashMap::from([
            (ENV_MODE, "none"),
            (ENV_CONCURRENCY, "2"),
            (ENV_FALLBACK_LABEL, "Inbox"),
        ]);
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.mode, ClassificationMode::None);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.fallback_label, "Inbox");
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut config = OrganizerConfig::default();
        let err = config
            .apply_env(|key| (key == ENV_CONCURRENCY).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_CONCURRENCY));
    }

    #[test]
    fn explicit_path_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organizer.toml");
        std::fs::write(&path, "fallback_label = \"Later\"\n").unwrap();

        let config = OrganizerConfig::from_file(&path).unwrap();
        assert_eq!(config.fallback_label, "Later");
        assert!(OrganizerConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
