use meter_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = RegistryError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown driver: {0}")]
    UnknownDriver(String),
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("no data from device: {0}")]
    NoData(String),
    #[error("driver already torn down")]
    Closed,
    #[error("background task failed: {0}")]
    Task(String),
}
