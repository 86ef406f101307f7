use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("connection pool exhausted ({0} connections, all busy)")]
    PoolExhausted(usize),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("Holder data error: {0}")]
    HolderData(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, Error>;
