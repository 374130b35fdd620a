//! Shared helpers for the end-to-end tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rowflow_core::prelude::{EngineConfig, Row, RowSchema, Value, ValueType};
use rowflow_exec::Engine;
use rowflow_steps::{Pass, RowIo, StepBehavior, StepContext, StepError, StepMeta};
use tracing_subscriber::EnvFilter;

static INIT_TEST_LOGGING: std::sync::Once = std::sync::Once::new();

/// Makes sure logging is initialized for the test binary.
///
/// Call at the start of every test.
pub fn init_test_logging() {
    INIT_TEST_LOGGING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("rowflow=debug,warn"))
            .with_test_writer()
            .try_init()
            .unwrap();
    });
}

pub fn int_schema() -> Arc<RowSchema> {
    RowSchema::builder()
        .field("n", ValueType::Integer)
        .build()
        .unwrap()
        .into_shared()
}

pub fn int_row(n: i64) -> Row {
    Row::new(vec![Value::Integer(n)])
}

/// First column of every row as an integer.
pub fn ints(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get(0).and_then(Value::as_i64).unwrap())
        .collect()
}

/// Column `idx` of every row as an integer.
pub fn column(rows: &[Row], idx: usize) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get(idx).and_then(Value::as_i64).unwrap())
        .collect()
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Identity pass-through.
    Pass,
    /// Never reads; spins until the run is stopped.
    Stall,
    /// Fails in `init`.
    FailInit,
    /// Panics on the first pass.
    Panic,
}

/// Test step kind that counts `init` and `dispose` calls across all copies.
pub struct Tracked {
    behaviour: Behaviour,
    pub inits: Arc<AtomicUsize>,
    pub disposals: Arc<AtomicUsize>,
}

impl StepMeta for Tracked {
    fn kind(&self) -> &'static str {
        "tracked"
    }

    fn create(&self) -> Box<dyn StepBehavior> {
        Box::new(TrackedStep {
            behaviour: self.behaviour,
            inits: Arc::clone(&self.inits),
            disposals: Arc::clone(&self.disposals),
        })
    }
}

struct TrackedStep {
    behaviour: Behaviour,
    inits: Arc<AtomicUsize>,
    disposals: Arc<AtomicUsize>,
}

impl StepBehavior for TrackedStep {
    fn init(&mut self, ctx: &StepContext<'_>) -> Result<(), StepError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.behaviour == Behaviour::FailInit {
            return Err(StepError::Config(format!("{} refuses to start", ctx.step)));
        }
        Ok(())
    }

    fn process(&mut self, io: &mut dyn RowIo) -> Result<Pass, StepError> {
        match self.behaviour {
            Behaviour::Stall => {
                if io.is_stopped() {
                    return Err(StepError::Stopped);
                }
                std::thread::sleep(Duration::from_millis(1));
                Ok(Pass::MoreWork)
            }
            Behaviour::Panic => panic!("tracked step blew up"),
            Behaviour::Pass | Behaviour::FailInit => {
                let row = match io.get_row().into_row() {
                    Ok(row) => row,
                    Err(pass) => return Ok(pass),
                };
                let schema = io.input_schema().unwrap();
                io.put_row(&schema, row)?;
                Ok(Pass::MoreWork)
            }
        }
    }

    fn dispose(&mut self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counters shared by every tracked step kind of one engine.
#[derive(Clone, Default)]
pub struct Counters {
    pub inits: Arc<AtomicUsize>,
    pub disposals: Arc<AtomicUsize>,
}

impl Counters {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

/// Engine with the built-ins plus `pass`, `stall`, `fail_init`, and `panic`.
pub fn tracked_engine(cfg: EngineConfig) -> (Engine, Counters) {
    let counters = Counters::default();
    let mut engine = Engine::new(cfg);
    for (kind, behaviour) in [
        ("pass", Behaviour::Pass),
        ("stall", Behaviour::Stall),
        ("fail_init", Behaviour::FailInit),
        ("panic", Behaviour::Panic),
    ] {
        let c = counters.clone();
        engine.registry_mut().register(kind, move |_cfg| {
            Ok(Arc::new(Tracked {
                behaviour,
                inits: Arc::clone(&c.inits),
                disposals: Arc::clone(&c.disposals),
            }) as Arc<dyn StepMeta>)
        });
    }
    (engine, counters)
}
