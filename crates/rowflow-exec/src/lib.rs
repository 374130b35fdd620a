#![forbid(unsafe_code)]
//! rowflow-exec: row channels, step units, and the two ways to run a graph.
//!
//! - `Trans` runs every step-copy on its own thread over bounded channels.
//! - `CooperativeExecutor` runs the whole graph on the caller's thread, one
//!   iteration at a time, over unbounded channels.
//!
//! Both are built from a `PipelineGraph` prepared by an `Engine`.

mod distribution;
pub mod error_sink;
pub mod graph;
pub mod listener;
pub mod metrics;
pub mod producer;
pub mod rowset;
pub mod runtime;
pub mod single_threaded;
pub mod threaded;
mod unit;

pub use error_sink::{CollectingErrorSink, ErrorRow, ErrorSink, TracingErrorSink};
pub use graph::PipelineGraph;
pub use listener::{RowCollector, RowListener};
pub use producer::RowProducer;
pub use rowset::{ChannelError, ChannelStats, Offer, Poll, RowSet};
pub use runtime::{Engine, ExecError};
pub use single_threaded::CooperativeExecutor;
pub use threaded::{StopHandle, Trans};
