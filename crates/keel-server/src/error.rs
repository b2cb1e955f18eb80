use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("internal error: {0}")]
    InternalError(String),
}
