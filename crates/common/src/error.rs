use thiserror::Error;

#[derive(Error, Debug)]
pub enum QaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Knowledge graph error: {0}")]
    KnowledgeGraph(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Convert anyhow errors to QaError
impl From<anyhow::Error> for QaError {
    fn from(err: anyhow::Error) -> Self {
        QaError::Unknown(err.to_string())
    }
}

impl From<toml::de::Error> for QaError {
    fn from(err: toml::de::Error) -> Self {
        QaError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QaError>;
