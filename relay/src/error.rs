use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed control message: {0}")]
    Protocol(String),

    #[error("target not registered")]
    NotRegistered,

    #[error("relay at capacity")]
    Capacity,

    #[error("session setup timed out")]
    SessionTimeout,

    #[error("refusing to relay-dial own address {0}")]
    OwnAddress(std::net::SocketAddr),

    #[error("target failed recently, skipping")]
    FailedRecently,

    #[error("dial cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
