//! Crate-wide error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::driver::DriverError;
use crate::protocol::sony::SonyDriverError;
use crate::registry::RegistryError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] SonyDriverError),
}
