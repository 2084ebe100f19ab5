use thiserror::Error;

use crate::validation::ValidationError;

pub type Result<T> = std::result::Result<T, AgriError>;

#[derive(Error, Debug)]
pub enum AgriError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Failed to fetch {resource}: {reason}")]
    Fetch { resource: String, reason: String },
    #[error("Failed to save profile: {reason}")]
    Save { reason: String },
    #[error("Failed to switch to profile {phone}: {reason}")]
    Switch { phone: String, reason: String },
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),
    #[error("Another profile write is still in progress")]
    Busy,
    #[error("Unexpected {resource} response: {reason}")]
    ShapeMismatch { resource: String, reason: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0} {1}")]
    Storage(String, String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgriError {
    pub fn fetch(resource: &str, reason: impl Into<String>) -> Self {
        Self::Fetch {
            resource: resource.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn shape(resource: &str, reason: impl ToString) -> Self {
        Self::ShapeMismatch {
            resource: resource.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgriError {
    fn from(value: serde_json::Error) -> Self {
        Self::Other(anyhow::Error::from(value))
    }
}

impl From<reqwest::Error> for AgriError {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(value.to_string())
    }
}

impl From<url::ParseError> for AgriError {
    fn from(value: url::ParseError) -> Self {
        Self::Config(value.to_string())
    }
}
