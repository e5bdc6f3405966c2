// src/error.rs
use std::error::Error;
use std::path::PathBuf;
use std::{fmt, io};

use crate::streaming::types::ChunkKey;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug)]
pub enum StreamError {
    Io(io::Error),
    Toml(toml::de::Error),
    InvalidConfig(String),
    /// A generator refused to fill a chunk.
    Generation { key: ChunkKey, reason: String },
    /// A persisted blob could not be decoded.
    Corrupt { path: PathBuf, reason: String },
    ShuttingDown,
}

impl StreamError {
    pub fn generation(key: ChunkKey, reason: impl Into<String>) -> Self {
        Self::Generation { key, reason: reason.into() }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt { path: path.into(), reason: reason.into() }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Toml(e) => write!(f, "config parse error: {e}"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Generation { key, reason } => write!(f, "could not generate {key}: {reason}"),
            Self::Corrupt { path, reason } => write!(f, "corrupt save file {}: {reason}", path.display()),
            Self::ShuttingDown => write!(f, "stream is shutting down"),
        }
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Toml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<toml::de::Error> for StreamError {
    fn from(err: toml::de::Error) -> Self {
        Self::Toml(err)
    }
}
