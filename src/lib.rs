// src/lib.rs
pub mod config;
pub mod error;
pub mod persistence;
pub mod streaming;
pub mod world;

pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use streaming::{ChunkConsumer, ChunkKind, ChunkManager, ChunkManagerBuilder, StreamStats};
