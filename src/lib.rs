//! rowflow: a row-oriented dataflow engine.
//!
//! Pipelines are graphs of steps joined by hops. Rows travel over bounded,
//! ordered channels between step-copies. A prepared graph runs either with one
//! thread per step-copy (`Trans`) or cooperatively on the caller's thread
//! (`CooperativeExecutor`).
//!
//! ```no_run
//! use rowflow::prelude::*;
//! use serde_json::json;
//!
//! let def = PipelineDef::new("demo")
//!     .step(StepDef::new("gen", "generator").with_config(json!({
//!         "limit": 3,
//!         "fields": [{"name": "n", "type": "Integer", "value": "1"}]
//!     })))
//!     .step(StepDef::new("seq", "sequence"))
//!     .connect("gen", "seq");
//!
//! let engine = Engine::new(EngineConfig::from_env());
//! let report = engine.execute(&def, ExecutionMode::Threaded).unwrap();
//! assert_eq!(report.state, RunState::Finished);
//! ```

pub use rowflow_core;
pub use rowflow_exec;
pub use rowflow_steps;

pub mod prelude {
    pub use rowflow_core::prelude::*;
    pub use rowflow_exec::{
        ChannelError, CollectingErrorSink, CooperativeExecutor, Engine, ErrorSink, ExecError,
        PipelineGraph, RowCollector, RowListener, RowProducer, StopHandle, Trans,
    };
    pub use rowflow_steps::{
        Fetch, Pass, Registry, RowIo, StepBehavior, StepContext, StepError, StepMeta,
    };
}
