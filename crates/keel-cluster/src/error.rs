use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Server(#[from] keel_server::error::ServerError),
    #[error(transparent)]
    Resource(#[from] crate::resources::ResourceError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid master URL: {0}")]
    InvalidMasterUrl(String),
    #[error("master URL '{0}' requires an externally provided detector")]
    DetectorUnavailable(String),
    #[error("driver is not running")]
    DriverNotRunning,
    #[error("internal error: {0}")]
    InternalError(String),
}
