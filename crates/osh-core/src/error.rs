use thiserror::Error;

/// Errors produced by the osh core.
#[derive(Debug, Error)]
pub enum OshError {
    #[error("malformed authorized key: {0}")]
    MalformedKey(String),

    #[error("unknown public key for {user}")]
    AuthRejected { user: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

pub type OshResult<T> = Result<T, OshError>;
