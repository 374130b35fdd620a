//! End-to-end tests of the cooperative (single-threaded) executor.

mod test_support;

use rowflow_core::prelude::{
    EngineConfig, Error, ExecutionMode, PipelineDef, Row, RunState, StepDef, StepState, StepStatus,
};
use rowflow_exec::{CooperativeExecutor, Engine, ExecError, Offer, RowCollector};
use serde_json::json;
use test_support::{column, init_test_logging, int_row, int_schema, ints, tracked_engine};

fn chain() -> PipelineDef {
    PipelineDef::new("chain")
        .step(StepDef::new("a", "dummy"))
        .step(StepDef::new("b", "dummy"))
        .step(StepDef::new("c", "dummy"))
        .connect("a", "b")
        .connect("b", "c")
}

#[test]
fn test_pass_through_one_row_per_iteration() {
    init_test_logging();
    let engine = Engine::default();
    let mut graph = engine.prepare(&chain(), ExecutionMode::Cooperative).unwrap();
    let producer = graph.add_row_producer("a", 0).unwrap();
    let collector = RowCollector::new();
    graph.add_row_listener("c", 0, collector.clone()).unwrap();

    let schema = int_schema();
    for i in 1..=3 {
        producer.put_row(&schema, int_row(i)).unwrap();
    }
    producer.finished();

    let mut exec = CooperativeExecutor::new(graph).unwrap();
    exec.init().unwrap();
    let mut results = vec![];
    let mut reached = vec![];
    loop {
        let more = exec.one_iteration();
        results.push(more);
        reached.push(collector.written().len());
        if !more {
            break;
        }
    }
    exec.dispose();

    assert_eq!(results, vec![true, true, true, false]);
    assert_eq!(reached, vec![1, 2, 3, 3]);
    assert_eq!(ints(&collector.written()), vec![1, 2, 3]);
    assert_eq!(exec.iterations(), 4);
    assert_eq!(exec.state(), RunState::Finished);
}

#[test]
fn test_rows_fed_between_iterations() {
    init_test_logging();
    let engine = Engine::default();
    let mut graph = engine.prepare(&chain(), ExecutionMode::Cooperative).unwrap();
    let producer = graph.add_row_producer("a", 0).unwrap();
    let collector = RowCollector::new();
    graph.add_row_listener("c", 0, collector.clone()).unwrap();
    let mut exec = CooperativeExecutor::new(graph).unwrap();
    exec.init().unwrap();

    let schema = int_schema();
    for i in 0..5 {
        assert_eq!(producer.try_put_row(&schema, int_row(i)).unwrap(), Offer::Accepted);
        assert!(exec.one_iteration());
        assert_eq!(collector.written().len(), i as usize + 1);
    }
    // Nothing buffered, producer still open: idle but not done.
    assert!(exec.one_iteration());
    assert_eq!(exec.state(), RunState::Running);

    producer.finished();
    while exec.one_iteration() {}
    assert_eq!(exec.state(), RunState::Finished);
    assert_eq!(ints(&collector.written()), vec![0, 1, 2, 3, 4]);
}

fn numbered() -> PipelineDef {
    PipelineDef::new("numbered")
        .step(StepDef::new("gen", "generator").with_config(json!({
            "limit": 9,
            "fields": [
                {"name": "n", "type": "Integer", "value": "4"},
                {"name": "label", "type": "String", "value": "x"}
            ]
        })))
        .step(StepDef::new("seq", "sequence").with_copies(2).with_config(json!({
            "field": "id",
            "start": 10,
            "increment": 5
        })))
        .step(StepDef::new("out", "select").with_config(json!({
            "fields": [{"name": "id"}, {"name": "n", "rename": "value"}]
        })))
        .connect("gen", "seq")
        .connect("seq", "out")
}

fn run_numbered() -> (Vec<Row>, Vec<StepStatus>) {
    let engine = Engine::default();
    let mut graph = engine.prepare(&numbered(), ExecutionMode::Cooperative).unwrap();
    let collector = RowCollector::new();
    graph.add_row_listener("out", 0, collector.clone()).unwrap();
    let mut exec = CooperativeExecutor::new(graph).unwrap();
    assert_eq!(exec.run_to_completion(1_000).unwrap(), RunState::Finished);
    (collector.written(), exec.statuses())
}

#[test]
fn test_cooperative_runs_are_repeatable() {
    init_test_logging();
    let (rows_a, statuses_a) = run_numbered();
    let (rows_b, statuses_b) = run_numbered();

    assert_eq!(rows_a, rows_b);
    assert_eq!(statuses_a, statuses_b);
    assert_eq!(rows_a.len(), 9);

    // Two sequence copies alternate, each counting on its own.
    assert_eq!(
        column(&rows_a, 0),
        vec![10, 10, 15, 15, 20, 20, 25, 25, 30]
    );
    assert!(column(&rows_a, 1).iter().all(|&v| v == 4));
}

#[test]
fn test_cycles_are_rejected() {
    init_test_logging();
    let def = PipelineDef::new("loop")
        .step(StepDef::new("a", "dummy"))
        .step(StepDef::new("b", "dummy"))
        .connect("a", "b")
        .connect("b", "a");
    let err = Engine::default()
        .prepare(&def, ExecutionMode::Cooperative)
        .err()
        .unwrap();
    assert!(matches!(err, ExecError::Core(Error::Cycle(ref names)) if names.len() == 2));
}

#[test]
fn test_threaded_graph_is_rejected() {
    init_test_logging();
    let graph = Engine::default()
        .prepare(&chain(), ExecutionMode::Threaded)
        .unwrap();
    assert!(matches!(
        CooperativeExecutor::new(graph),
        Err(ExecError::Mode(_))
    ));
}

#[test]
fn test_step_failure_ends_iteration() {
    init_test_logging();
    let def = PipelineDef::new("guard")
        .step(StepDef::new("a", "dummy"))
        .step(StepDef::new("guard", "abort").with_config(json!({"threshold": 1})))
        .step(StepDef::new("c", "dummy"))
        .connect("a", "guard")
        .connect("guard", "c");
    let mut graph = Engine::default()
        .prepare(&def, ExecutionMode::Cooperative)
        .unwrap();
    let producer = graph.add_row_producer("a", 0).unwrap();
    let schema = int_schema();
    for i in 0..3 {
        producer.put_row(&schema, int_row(i)).unwrap();
    }
    producer.finished();

    let mut exec = CooperativeExecutor::new(graph).unwrap();
    exec.init().unwrap();
    assert!(exec.one_iteration());
    assert!(!exec.one_iteration());
    assert!(!exec.one_iteration());

    assert_eq!(exec.state(), RunState::Errored);
    let report = exec.report();
    let guard = report.step("guard")[0];
    assert_eq!(guard.state, StepState::Errored);
    assert!(guard.cause.as_deref().unwrap().contains("aborting after 2 rows"));
    assert_eq!(report.step("c")[0].rows_read, 1);
}

#[test]
fn test_init_and_dispose_happen_once() {
    init_test_logging();
    let (engine, counters) = tracked_engine(EngineConfig::default());
    let def = PipelineDef::new("tracked")
        .step(StepDef::new("a", "pass").with_copies(2))
        .step(StepDef::new("b", "pass"))
        .connect("a", "b");
    let mut graph = engine.prepare(&def, ExecutionMode::Cooperative).unwrap();
    let producers: Vec<_> = (0..2)
        .map(|copy| graph.add_row_producer("a", copy).unwrap())
        .collect();

    {
        let mut exec = CooperativeExecutor::new(graph).unwrap();
        exec.init().unwrap();
        exec.init().unwrap();
        assert_eq!(counters.inits(), 3);

        for p in &producers {
            p.put_row(&int_schema(), int_row(1)).unwrap();
            p.finished();
        }
        assert_eq!(exec.run_to_completion(100).unwrap(), RunState::Finished);
        assert_eq!(exec.report().step("b")[0].rows_read, 2);

        exec.dispose();
        exec.dispose();
        assert_eq!(counters.disposals(), 3);
    }
    // Dropping the executor does not dispose again.
    assert_eq!(counters.disposals(), 3);
}

#[test]
fn test_init_failure_is_reported() {
    init_test_logging();
    let (engine, counters) = tracked_engine(EngineConfig::default());
    let def = PipelineDef::new("broken")
        .step(StepDef::new("a", "pass"))
        .step(StepDef::new("b", "fail_init"))
        .connect("a", "b");
    let graph = engine.prepare(&def, ExecutionMode::Cooperative).unwrap();
    let mut exec = CooperativeExecutor::new(graph).unwrap();

    let err = exec.init().err().unwrap();
    assert!(matches!(err, ExecError::Init { ref step, .. } if step == "b"));
    assert_eq!(counters.disposals(), 2);
    assert!(!exec.one_iteration());
    assert_eq!(exec.state(), RunState::Errored);
}

#[test]
fn test_iteration_before_init_does_nothing() {
    init_test_logging();
    let graph = Engine::default()
        .prepare(&chain(), ExecutionMode::Cooperative)
        .unwrap();
    let mut exec = CooperativeExecutor::new(graph).unwrap();
    assert!(!exec.one_iteration());
    assert_eq!(exec.iterations(), 0);
    assert!(!exec.is_initialized());
}
