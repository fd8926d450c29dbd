//! Core library: configuration, endpoint failover, classification, tag
//! merging, per-file processing and the sweep orchestrator.

pub mod classifier;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod processor;
pub mod scanner;
pub mod sweep;

pub use error::TaggerError;
