#![forbid(unsafe_code)]
//! rowflow-core: values, rows, schemas, pipeline definitions, and configuration.
//!
//! Everything here is plain data. Threads, channels and step execution live in
//! `rowflow-exec`; step behaviours live in `rowflow-steps`.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod pipeline;
pub mod prelude;
pub mod report;
pub mod schema;
pub mod types;

pub use error::{Error, Result};

/// Engine version recorded in run reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
