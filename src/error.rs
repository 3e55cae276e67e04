//! Crate-level error type

use thiserror::Error;

use crate::engine::{CaptureError, EngineError};
use crate::registry::RegistryError;
use crate::signal::DecodeError;
use crate::transport::TransportError;

/// Any error the share core can surface to a caller
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
