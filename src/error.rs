use std::time::Duration;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("no proposed folder named '{0}' in plan")]
    TargetNotFound(String),

    #[error("file '{0}' is not part of the plan")]
    FileNotFound(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("could not create folder '{label}': {reason}")]
    FolderCreation { label: String, reason: String },

    #[error("could not move '{file_id}': {reason}")]
    Move { file_id: String, reason: String },

    #[error("{0} timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("organization cancelled")]
    Cancelled,
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_display_string() {
        let err = AppError::FileNotFound("abc".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"file 'abc' is not part of the plan\"");
    }

    #[test]
    fn timeout_message_names_the_call() {
        let err = AppError::Timeout("classify 'a.pdf'".to_string(), Duration::from_secs(30));
        assert_eq!(err.to_string(), "classify 'a.pdf' timed out after 30s");
        assert!(!err.is_cancelled());
        assert!(AppError::Cancelled.is_cancelled());
    }
}
