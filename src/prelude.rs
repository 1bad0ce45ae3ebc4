use miette::Diagnostic;
use std::fmt::Display;
use thiserror::Error;

pub use ethdex_core::{IndexError, NodeError, StoreError};

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("client error: {0}")]
    ClientError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error(transparent)]
    #[diagnostic(code(ethdex::index))]
    IndexError(#[from] IndexError),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn config(text: impl Display) -> Error {
        Error::ConfigError(text.to_string())
    }

    pub fn client(error: impl Display) -> Error {
        Error::ClientError(error.to_string())
    }

    pub fn storage(error: impl Display) -> Error {
        Error::StorageError(error.to_string())
    }

    pub fn message(text: impl Into<String>) -> Error {
        Error::Message(text.into())
    }
}

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        Error::IndexError(value.into())
    }
}

impl From<NodeError> for Error {
    fn from(value: NodeError) -> Self {
        Error::IndexError(value.into())
    }
}

impl From<ethdex_redb3::Error> for Error {
    fn from(value: ethdex_redb3::Error) -> Self {
        Error::storage(value)
    }
}
