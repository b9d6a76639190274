//! Tracectx Context Library
//!
//! This crate turns raw trace and log telemetry into compact, size-bounded
//! context for a language model: it rebuilds span hierarchies, attaches logs
//! to their spans, projects only the requested attributes, prunes logs by
//! predicate and splits the serialized result into fragments that each fit a
//! character budget.
//!
//! # Modules
//!
//! - [`models`] - Raw span, trace and log records
//! - [`hierarchy`] - Parent/child reconstruction from flat span records
//! - [`tree`] - The request-scoped span/log tree
//! - [`feature`] - Attribute vocabulary and selections
//! - [`projector`] - Feature projection to ordered JSON
//! - [`filter`] - Predicate-based log filtering
//! - [`chunk`] - Sequential and semantic chunkers
//! - [`config`] - Chunking configuration
//! - [`pipeline`] - End-to-end assembly
//!
//! # Example
//!
//! ```
//! use context::models::{LogEntry, LogLevel, Span};
//! use context::pipeline::{build_context, ContextRequest};
//! use context::tree::LogBatch;
//!
//! let root = Span::new("root", "service.handle", 0.0, 2.0)
//!     .with_child(Span::new("db", "db.query", 0.5, 1.5).with_parent("root"));
//! let logs = LogBatch::from([(
//!     "db".to_string(),
//!     vec![LogEntry::new(1.0, LogLevel::Warning, "slow query")],
//! )]);
//!
//! let rendered = build_context(&root, &[logs], &ContextRequest::new()).unwrap();
//! for fragment in rendered.chunks().unwrap() {
//!     assert!(fragment.contains("slow query"));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod chunk;
pub mod config;
pub mod feature;
pub mod filter;
pub mod hierarchy;
pub mod models;
pub mod pipeline;
pub mod projector;
pub mod tree;

use thiserror::Error;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde_json;

/// Errors raised anywhere in context assembly.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Invalid filter arguments.
    #[error("Filter error: {0}")]
    Filter(#[from] filter::FilterError),

    /// A chunker could not be started.
    #[error("Chunk error: {0}")]
    Chunk(#[from] chunk::ChunkError),

    /// Invalid chunk configuration.
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// The projected tree could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
