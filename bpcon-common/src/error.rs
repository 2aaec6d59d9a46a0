use thiserror::Error;

use crate::{auth::AuthError, env::proposal::CommandError};

#[derive(Debug, Error)]
pub enum BpconError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid command: {0}")]
    Command(#[from] CommandError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BpconError>;
