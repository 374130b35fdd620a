#![forbid(unsafe_code)]
//! rowflow-steps: the step capability contract plus a small set of built-in steps.
//!
//! Design intent:
//! - A step never knows which scheduler runs it; it only talks to `RowIo`.
//! - Configuration is validated once per step (`StepMeta`), state is private
//!   to each copy (`StepBehavior`).
//! - Built-ins exist to exercise the engine; production step catalogues plug in
//!   through `Registry::register`.

pub mod registry;
pub mod traits;

pub mod abort;
pub mod dummy;
pub mod filter;
pub mod generator;
pub mod select;
pub mod sequence;

#[cfg(test)]
mod testing;

pub use registry::{parse_config, Registry, StepFactory};
pub use traits::{Fetch, Pass, RowIo, StepBehavior, StepContext, StepError, StepMeta};
