//! Integration tests for all-or-nothing behavior of sagas.

use std::sync::{Mutex, PoisonError};

use sagalab_core::SagaId;
use sagalab_saga::{
    CompensationLog, SagaBuilder, SagaCoordinator, SagaDefinition, SagaExecution, SagaOutcome,
    SagaStatus, SagaStep, StepInvocation,
};
use serde_json::{Value, json};

#[derive(Default)]
struct Ledger {
    events: Mutex<Vec<String>>,
}

impl Ledger {
    fn push(&self, event: String) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TestError(String);

struct CountingStep {
    name: String,
    fail: bool,
}

impl SagaStep for CountingStep {
    type Context = Ledger;
    type Error = TestError;

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        ctx: &Self::Context,
        invocation: &StepInvocation,
        input: Value,
    ) -> Result<Value, Self::Error> {
        if self.fail {
            return Err(TestError(format!("{} rejected", self.name)));
        }
        ctx.push(format!("{}:forward:{}", invocation.saga_id, self.name));
        Ok(json!(input.as_u64().unwrap_or_default() + 1))
    }

    fn compensate(
        &self,
        ctx: &Self::Context,
        invocation: &StepInvocation,
        _input: Value,
        _forward_result: Value,
    ) -> Result<(), Self::Error> {
        ctx.push(format!("{}:undo:{}", invocation.saga_id, self.name));
        Ok(())
    }
}

fn definition(len: usize, failing_index: Option<usize>) -> SagaDefinition<Ledger, TestError> {
    let step = |index: usize| CountingStep {
        name: format!("step{index}"),
        fail: failing_index == Some(index),
    };
    let mut builder = SagaBuilder::new("counting").first_step(step(0));
    for index in 1..len {
        builder = builder.then(step(index));
    }
    builder.build()
}

#[test]
fn failure_at_each_index_compensates_exactly_the_prefix() -> anyhow::Result<()> {
    const STEPS: usize = 5;

    for failing in 0..STEPS {
        let ledger = Ledger::default();
        let log = CompensationLog::new();
        let definition = definition(STEPS, Some(failing));
        let mut execution = SagaExecution::new(SagaId::from("s"), "counting", json!(0));

        let outcome = SagaCoordinator::new(&definition, &log).run(&ledger, &mut execution)?;

        assert!(matches!(outcome, SagaOutcome::Compensated { .. }));
        assert_eq!(execution.status(), SagaStatus::Compensated);

        let entries = log.entries(execution.saga_id());
        let indices: Vec<usize> = entries.iter().map(|e| e.step_index).collect();
        assert_eq!(indices, (0..failing).collect::<Vec<_>>());
        assert!(entries.iter().all(|e| e.compensated));

        let forward = ledger
            .events()
            .into_iter()
            .filter(|e| e.contains(":forward:"))
            .count();
        assert_eq!(forward, failing, "no forward action beyond step {failing}");
    }
    Ok(())
}

#[test]
fn compensations_run_in_strict_reverse_order() -> anyhow::Result<()> {
    let ledger = Ledger::default();
    let log = CompensationLog::new();
    let definition = definition(4, Some(3));
    let mut execution = SagaExecution::new(SagaId::from("s"), "counting", json!(0));

    SagaCoordinator::new(&definition, &log).run(&ledger, &mut execution)?;

    let undo: Vec<String> = ledger
        .events()
        .into_iter()
        .filter(|e| e.contains(":undo:"))
        .collect();
    assert_eq!(undo, vec!["s:undo:step2", "s:undo:step1", "s:undo:step0"]);
    Ok(())
}

#[test]
fn concurrent_sagas_share_one_log_without_interference() {
    let ledger = Ledger::default();
    let log = CompensationLog::new();
    let succeeding = definition(3, None);
    let failing = definition(3, Some(2));

    std::thread::scope(|scope| {
        for n in 0..8 {
            let (ledger, log) = (&ledger, &log);
            let definition = if n % 2 == 0 { &succeeding } else { &failing };
            scope.spawn(move || {
                let mut execution =
                    SagaExecution::new(SagaId::new(format!("saga-{n}")), "counting", json!(0));
                let _ = SagaCoordinator::new(definition, log).run(ledger, &mut execution);
            });
        }
    });

    assert_eq!(log.saga_ids().len(), 8);
    for n in 0..8 {
        let entries = log.entries(&SagaId::new(format!("saga-{n}")));
        if n % 2 == 0 {
            assert_eq!(entries.len(), 3);
            assert!(entries.iter().all(|e| !e.compensated));
        } else {
            assert_eq!(entries.len(), 2);
            assert!(entries.iter().all(|e| e.compensated));
        }
    }
}
