use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaveError {
    #[error("hashing error: {0}")]
    Core(#[from] echocave_core::CoreError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("blob store error on '{name}': {message}")]
    Blob { name: String, message: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("LLM endpoint error: {0}")]
    Llm(String),

    #[error("LLM response contained no parseable JSON")]
    CorruptResponse,

    #[error("no LLM endpoints configured")]
    NoEndpoints,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CaveError {
    pub fn blob(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Blob {
            name: name.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CaveError>;
