//! Convenient re-exports for downstream crates.

pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::hash::Hash256;
pub use crate::id::{ChannelId, StepCopyId};
pub use crate::pipeline::{HopDef, OutputMode, PipelineDef, Routing, StepDef};
pub use crate::report::{ExecutionMode, RunId, RunReport, RunState, StepState, StepStatus};
pub use crate::schema::{FieldMeta, RowSchema, ValueType};
pub use crate::types::{Row, Value};
