use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Measurement source error: {0}")]
    Source(String),
    #[error("Measurement source does not support {0}")]
    Unsupported(&'static str),
    #[error("Payload error: {0}")]
    Payload(String),
    #[error("Malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Trace error: {0}")]
    Trace(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, AnnotationError>;
