// src/streaming/cache/mod.rs
mod lru;

pub use lru::BucketCache;
