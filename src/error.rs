use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::server::{ServerError, SessionError};
use crate::transport::TransportError;

/// Crate-level convenience error: a thin wrapper over the capability errors,
/// not a replacement for them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, Error>;
