use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use indexmap::IndexMap;
use sagalab_causal::{CausalTracker, Session};
use sagalab_core::{SagaId, Timestamp};
use sagalab_saga::{
    CancellationToken, CompensationLog, CompensationLogEntry, JournalError, RunOptions,
    SagaCoordinator, SagaDefinition, SagaExecution, SagaJournal, SagaOutcome,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::OrchestratorConfig;
use crate::context::StepContext;
use crate::error::OperationError;
use crate::executor::{RetryPolicy, StepExecutor};
use crate::providers::FileSystemSagaStateIO;
use crate::report::SagaReport;
use crate::traits::{ReplicatedStore, SagaStateIO};
use crate::types::SagaSnapshot;

/// A saga definition whose steps run against a [`StepContext`].
pub type Definition = SagaDefinition<StepContext, OperationError>;

struct SagaEntry {
    execution: SagaExecution,
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
    /// Error the worker ended with, handed to the first `wait`.
    failure: Option<OperationError>,
    error: Option<String>,
}

/// How a worker picks up its saga.
enum Launch {
    Fresh,
    /// Continue from a snapshot, with the causal state it recorded.
    Resume {
        clock: Timestamp,
        session: Option<Session>,
    },
}

impl SagaEntry {
    fn new(execution: SagaExecution) -> Self {
        Self {
            execution,
            cancellation: CancellationToken::new(),
            handle: None,
            failure: None,
            error: None,
        }
    }
}

struct Shared {
    config: OrchestratorConfig,
    executor: Arc<StepExecutor>,
    log: CompensationLog,
    definitions: RwLock<IndexMap<String, Arc<Definition>>>,
    sagas: Mutex<IndexMap<SagaId, SagaEntry>>,
    state_io: Option<Arc<dyn SagaStateIO>>,
    sequence: AtomicU64,
}

impl Shared {
    fn sagas(&self) -> MutexGuard<'_, IndexMap<SagaId, SagaEntry>> {
        self.sagas.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn definition(&self, id: &str) -> Result<Arc<Definition>> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| OperationError::UnknownDefinition(id.to_string()))
    }

    fn next_saga_id(&self) -> SagaId {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let name = petname::petname(2, "-").unwrap_or_else(|| "saga".to_string());
        SagaId::new(format!("{name}-{sequence}"))
    }

    /// Drive one saga to a terminal state on the calling thread.
    fn drive(
        &self,
        definition: &Definition,
        mut execution: SagaExecution,
        cancellation: CancellationToken,
        launch: Launch,
    ) -> Result<SagaOutcome<OperationError>> {
        let saga_id = execution.saga_id().clone();
        let executor = Arc::clone(&self.executor);
        let consistency = *self.config.consistency();
        let (ctx, resume) = match launch {
            Launch::Fresh => (StepContext::new(saga_id.clone(), executor, consistency), false),
            Launch::Resume { clock, session } => (
                StepContext::restore(saga_id.clone(), executor, consistency, clock, session),
                true,
            ),
        };
        let journal = ContextJournal { shared: self, ctx: &ctx };
        let coordinator = SagaCoordinator::new(definition, &self.log)
            .with_journal(&journal)
            .with_options(RunOptions {
                step_timeout: Some(self.config.saga().step_timeout()),
                cancellation,
            });

        let result = if resume {
            coordinator.resume(&ctx, &mut execution)
        } else {
            coordinator.run(&ctx, &mut execution)
        };

        if let Some(entry) = self.sagas().get_mut(&saga_id) {
            entry.execution = execution;
        }
        result.map_err(OperationError::from)
    }

    fn record_failure(&self, saga_id: &SagaId, error: OperationError) {
        warn!(saga_id = %saga_id, error = %error, "saga worker finished with an error");
        if let Some(entry) = self.sagas().get_mut(saga_id) {
            entry.error = Some(error.to_string());
            entry.failure = Some(error);
        }
    }

    fn report(&self, saga_id: &SagaId) -> Result<SagaReport> {
        let known = self
            .sagas()
            .get(saga_id)
            .map(|entry| (entry.execution.clone(), entry.error.clone()));
        let Some((execution, error)) = known else {
            return self.archived_report(saga_id);
        };
        Ok(SagaReport {
            execution,
            entries: self.log.entries(saga_id),
            violations: self.executor.tracker().violations_for_saga(saga_id),
            error,
        })
    }

    /// Report of a saga no longer held in memory, read back from its snapshot.
    fn archived_report(&self, saga_id: &SagaId) -> Result<SagaReport> {
        let snapshot = match &self.state_io {
            Some(state_io) => state_io.load(saga_id)?,
            None => None,
        };
        let snapshot = snapshot.ok_or_else(|| OperationError::UnknownSaga(saga_id.clone()))?;
        Ok(SagaReport {
            execution: snapshot.execution,
            entries: snapshot.entries,
            violations: self.executor.tracker().violations_for_saga(saga_id),
            error: None,
        })
    }

    /// Record `execution` in memory and, when persistence is configured, on
    /// disk along with `ctx`'s clock and session.
    fn persist(
        &self,
        execution: &SagaExecution,
        entries: &[CompensationLogEntry],
        ctx: Option<&StepContext>,
    ) -> std::result::Result<(), JournalError> {
        if let Some(entry) = self.sagas().get_mut(execution.saga_id()) {
            entry.execution = execution.clone();
        }

        let Some(state_io) = &self.state_io else {
            return Ok(());
        };
        let mut snapshot = SagaSnapshot::new(execution.clone(), entries.to_vec());
        if let Some(ctx) = ctx {
            snapshot = snapshot.with_causal_state(ctx.clock().current(), ctx.session());
        }
        state_io.save(&snapshot).map_err(|error| JournalError {
            saga_id: execution.saga_id().clone(),
            source: Box::new(error),
        })?;
        debug!(saga_id = %execution.saga_id(), status = %execution.status(), "saga checkpointed");
        Ok(())
    }
}

/// Checkpoints one running saga together with its clock and session.
struct ContextJournal<'a> {
    shared: &'a Shared,
    ctx: &'a StepContext,
}

impl SagaJournal for ContextJournal<'_> {
    fn checkpoint(
        &self,
        execution: &SagaExecution,
        entries: &[CompensationLogEntry],
    ) -> std::result::Result<(), JournalError> {
        self.shared.persist(execution, entries, Some(self.ctx))
    }
}

/// Registers saga definitions and runs their invocations.
///
/// Every invocation gets its own worker thread (or runs inline with
/// [`run`](Self::run)), its own logical clock and causal session. The
/// compensation log, causal tracker and store are shared by all of them.
/// With a state directory configured, each transition is persisted and
/// [`recover`](Self::recover) picks up unfinished sagas after a restart.
pub struct SagaOrchestrator {
    shared: Arc<Shared>,
}

impl SagaOrchestrator {
    /// Orchestrator over `store`; persists to `config.saga().state_dir()` when set.
    #[must_use]
    pub fn new(store: Arc<dyn ReplicatedStore>, config: OrchestratorConfig) -> Self {
        let state_io = config
            .saga()
            .state_dir()
            .map(|dir| Arc::new(FileSystemSagaStateIO::new(dir)) as Arc<dyn SagaStateIO>);
        Self::build(store, config, state_io)
    }

    /// Orchestrator persisting through `state_io` regardless of configuration.
    #[must_use]
    pub fn with_state_io(
        store: Arc<dyn ReplicatedStore>,
        config: OrchestratorConfig,
        state_io: Arc<dyn SagaStateIO>,
    ) -> Self {
        Self::build(store, config, Some(state_io))
    }

    fn build(
        store: Arc<dyn ReplicatedStore>,
        config: OrchestratorConfig,
        state_io: Option<Arc<dyn SagaStateIO>>,
    ) -> Self {
        let tracker = Arc::new(
            CausalTracker::with_history_depth(config.causal().history_depth())
                .with_max_violations(config.causal().max_violations()),
        );
        let executor = StepExecutor::new(store, tracker)
            .with_retry(RetryPolicy::from(config.retry()))
            .with_timeout(config.saga().step_timeout());

        Self {
            shared: Arc::new(Shared {
                config,
                executor: Arc::new(executor),
                log: CompensationLog::new(),
                definitions: RwLock::new(IndexMap::new()),
                sagas: Mutex::new(IndexMap::new()),
                state_io,
                sequence: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<CausalTracker> {
        self.shared.executor.tracker()
    }

    #[must_use]
    pub fn log(&self) -> &CompensationLog {
        &self.shared.log
    }

    /// # Errors
    ///
    /// Returns [`OperationError::DuplicateDefinition`] if the id is taken.
    pub fn register(&self, definition: Definition) -> Result<()> {
        let mut definitions = self
            .shared
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = definition.id().to_string();
        if definitions.contains_key(&id) {
            return Err(OperationError::DuplicateDefinition(id));
        }
        debug!(definition = %id, steps = definition.len(), "registered saga definition");
        definitions.insert(id, Arc::new(definition));
        Ok(())
    }

    /// Registered definition ids, in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<String> {
        self.shared
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Start a saga on a worker thread and return its id immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition is unknown, the initial snapshot
    /// cannot be persisted or the thread cannot be spawned.
    pub fn start(&self, definition_id: &str, payload: Value) -> Result<SagaId> {
        let definition = self.shared.definition(definition_id)?;
        let execution = self.submit(definition_id, payload)?;
        let saga_id = execution.saga_id().clone();
        self.spawn(definition, execution, Launch::Fresh)?;
        Ok(saga_id)
    }

    /// Run a saga to completion on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::SagaCompensationFailed`] when the saga ends
    /// `Failed`, a journal error when persistence fails, and the same
    /// precondition errors as [`start`](Self::start). A step failure that was
    /// compensated is not an error; check the report's status.
    pub fn run(&self, definition_id: &str, payload: Value) -> Result<SagaReport> {
        let definition = self.shared.definition(definition_id)?;
        let execution = self.submit(definition_id, payload)?;
        let saga_id = execution.saga_id().clone();
        let cancellation = self.cancellation_token(&saga_id)?;

        if let Err(error) = self
            .shared
            .drive(&definition, execution, cancellation, Launch::Fresh)
        {
            if let Some(entry) = self.shared.sagas().get_mut(&saga_id) {
                entry.error = Some(error.to_string());
            }
            return Err(error);
        }
        self.shared.report(&saga_id)
    }

    /// Current state of a saga.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::UnknownSaga`] for an id that is neither held
    /// in memory nor persisted.
    pub fn query(&self, saga_id: &SagaId) -> Result<SagaReport> {
        self.shared.report(saga_id)
    }

    /// Ask a running saga to stop after its current step and compensate.
    /// Has no effect on a saga that already finished.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::UnknownSaga`] for an unknown id.
    pub fn cancel(&self, saga_id: &SagaId) -> Result<()> {
        let token = self.cancellation_token(saga_id)?;
        info!(saga_id = %saga_id, "cancellation requested");
        token.cancel();
        Ok(())
    }

    /// Block until the saga's worker thread has finished, then report.
    ///
    /// # Errors
    ///
    /// Returns the error the worker ended with (compensation or persistence
    /// failure) to the first caller, [`OperationError::WorkerPanicked`] if the
    /// thread panicked, and [`OperationError::UnknownSaga`] for an unknown id.
    pub fn wait(&self, saga_id: &SagaId) -> Result<SagaReport> {
        let handle = {
            let mut sagas = self.shared.sagas();
            let Some(entry) = sagas.get_mut(saga_id) else {
                drop(sagas);
                return self.shared.archived_report(saga_id);
            };
            entry.handle.take()
        };

        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| OperationError::WorkerPanicked(saga_id.clone()))?;
        }

        let failure = self
            .shared
            .sagas()
            .get_mut(saga_id)
            .and_then(|entry| entry.failure.take());
        match failure {
            Some(error) => Err(error),
            None => self.shared.report(saga_id),
        }
    }

    /// Ids of every saga held in memory, oldest first.
    #[must_use]
    pub fn sagas(&self) -> Vec<SagaId> {
        self.shared.sagas().keys().cloned().collect()
    }

    /// Drop finished sagas from memory along with their compensation log
    /// entries, returning their ids.
    ///
    /// A saga is finished once it is terminal and its worker has exited with
    /// no error left for [`wait`](Self::wait) to hand out. With persistence
    /// configured, [`query`](Self::query) and `wait` keep answering for
    /// archived sagas from their snapshots.
    pub fn archive_finished(&self) -> Vec<SagaId> {
        let archived: Vec<SagaId> = {
            let mut sagas = self.shared.sagas();
            let finished: Vec<SagaId> = sagas
                .iter()
                .filter(|(_, entry)| {
                    entry.execution.status().is_terminal()
                        && entry.failure.is_none()
                        && entry.handle.as_ref().is_none_or(JoinHandle::is_finished)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &finished {
                sagas.shift_remove(id);
            }
            finished
        };

        for id in &archived {
            self.shared.log.take(id);
        }
        if !archived.is_empty() {
            info!(count = archived.len(), "archived finished sagas");
        }
        archived
    }

    /// Reload persisted sagas that had not reached a terminal state and
    /// continue them on worker threads.
    ///
    /// `Compensating` sagas finish their rollback, `Running` sagas resume at
    /// their pending step when it is idempotent and compensate otherwise,
    /// `Pending` sagas start. Snapshots of unregistered definitions and of
    /// sagas this orchestrator already tracks are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshots cannot be listed or a worker cannot
    /// be spawned.
    pub fn recover(&self) -> Result<Vec<SagaId>> {
        let Some(state_io) = &self.shared.state_io else {
            return Ok(Vec::new());
        };

        let mut recovered = Vec::new();
        for snapshot in state_io.list()? {
            let saga_id = snapshot.execution.saga_id().clone();
            if snapshot.execution.status().is_terminal()
                || self.shared.sagas().contains_key(&saga_id)
            {
                continue;
            }
            let definition = match self.shared.definition(snapshot.execution.definition_id()) {
                Ok(definition) => definition,
                Err(error) => {
                    warn!(saga_id = %saga_id, error = %error, "skipping saga during recovery");
                    continue;
                }
            };

            info!(
                saga_id = %saga_id,
                status = %snapshot.execution.status(),
                logged_steps = snapshot.entries.len(),
                "recovering saga"
            );
            self.shared.log.restore(snapshot.entries);
            self.shared
                .sagas()
                .insert(saga_id.clone(), SagaEntry::new(snapshot.execution.clone()));
            let launch = Launch::Resume {
                clock: snapshot.clock,
                session: snapshot.session,
            };
            self.spawn(definition, snapshot.execution, launch)?;
            recovered.push(saga_id);
        }
        Ok(recovered)
    }

    fn submit(&self, definition_id: &str, payload: Value) -> Result<SagaExecution> {
        let saga_id = self.shared.next_saga_id();
        let execution = SagaExecution::new(saga_id.clone(), definition_id, payload);
        self.shared
            .sagas()
            .insert(saga_id.clone(), SagaEntry::new(execution.clone()));
        self.shared
            .persist(&execution, &[], None)
            .map_err(|error| OperationError::Journal {
                saga_id: error.saga_id,
                source: error.source,
            })?;
        info!(saga_id = %saga_id, definition = definition_id, "saga submitted");
        Ok(execution)
    }

    fn cancellation_token(&self, saga_id: &SagaId) -> Result<CancellationToken> {
        self.shared
            .sagas()
            .get(saga_id)
            .map(|entry| entry.cancellation.clone())
            .ok_or_else(|| OperationError::UnknownSaga(saga_id.clone()))
    }

    fn spawn(
        &self,
        definition: Arc<Definition>,
        execution: SagaExecution,
        launch: Launch,
    ) -> Result<()> {
        let saga_id = execution.saga_id().clone();
        let cancellation = self.cancellation_token(&saga_id)?;
        let shared = Arc::clone(&self.shared);
        let worker_id = saga_id.clone();

        let handle = thread::Builder::new()
            .name(format!("saga-{saga_id}"))
            .spawn(move || {
                if let Err(error) = shared.drive(&definition, execution, cancellation, launch) {
                    shared.record_failure(&worker_id, error);
                }
            })?;

        if let Some(entry) = self.shared.sagas().get_mut(&saga_id) {
            entry.handle = Some(handle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use sagalab_saga::{SagaBuilder, SagaStatus, StepSpec};
    use serde_json::json;

    use super::*;
    use crate::mocks::{FailingSagaStateIO, MockSagaStateIO};
    use crate::providers::InMemoryReplicaSet;

    fn orchestrator() -> SagaOrchestrator {
        SagaOrchestrator::new(
            Arc::new(InMemoryReplicaSet::default()),
            OrchestratorConfig::default(),
        )
    }

    fn echo_saga(id: &str) -> Definition {
        SagaBuilder::<StepContext, OperationError>::new(id)
            .first_step(StepSpec::new("echo", |_ctx: &StepContext, _inv, input| Ok(input)))
            .build()
    }

    fn failing_saga(id: &str) -> Definition {
        SagaBuilder::<StepContext, OperationError>::new(id)
            .first_step(StepSpec::new("ok", |_ctx: &StepContext, _inv, input| Ok(input)))
            .then(StepSpec::new("boom", |_ctx: &StepContext, _inv, _input| {
                Err(OperationError::Saga("boom".to_string()))
            }))
            .build()
    }

    #[test]
    fn duplicate_definition_is_rejected() {
        let orchestrator = orchestrator();
        orchestrator.register(echo_saga("echo")).expect("first registration");

        let err = orchestrator
            .register(echo_saga("echo"))
            .expect_err("second registration should fail");

        assert!(matches!(err, OperationError::DuplicateDefinition(ref id) if id == "echo"));
        assert_eq!(orchestrator.definitions(), vec!["echo".to_string()]);
    }

    #[test]
    fn unknown_definition_and_saga_are_errors() {
        let orchestrator = orchestrator();

        assert!(matches!(
            orchestrator.start("nope", json!({})),
            Err(OperationError::UnknownDefinition(_))
        ));
        assert!(matches!(
            orchestrator.query(&SagaId::from("ghost-1")),
            Err(OperationError::UnknownSaga(_))
        ));
        assert!(matches!(
            orchestrator.cancel(&SagaId::from("ghost-1")),
            Err(OperationError::UnknownSaga(_))
        ));
    }

    #[test]
    fn run_returns_completed_report() {
        let orchestrator = orchestrator();
        orchestrator.register(echo_saga("echo")).expect("registration");

        let report = orchestrator
            .run("echo", json!({"n": 1}))
            .expect("run should succeed");

        assert_eq!(report.status(), SagaStatus::Completed);
        assert_eq!(report.executed_steps().len(), 1);
        assert_eq!(report.executed_steps()[0].result, json!({"n": 1}));
        assert!(report.uncompensated_steps().is_empty());
    }

    #[test]
    fn compensated_run_is_not_an_error() {
        let orchestrator = orchestrator();
        orchestrator.register(failing_saga("fails")).expect("registration");

        let report = orchestrator.run("fails", json!({})).expect("run should succeed");

        assert_eq!(report.status(), SagaStatus::Compensated);
        assert_eq!(report.failure().map(|f| f.step_name.as_str()), Some("boom"));
        assert_eq!(report.summary(), "↩ ok\n✗ boom");
    }

    #[test]
    fn saga_ids_are_named_and_sequenced() {
        let orchestrator = orchestrator();
        orchestrator.register(echo_saga("echo")).expect("registration");

        let first = orchestrator.run("echo", json!({})).expect("run");
        let second = orchestrator.run("echo", json!({})).expect("run");

        assert!(first.saga_id().as_str().ends_with("-1"));
        assert!(second.saga_id().as_str().ends_with("-2"));
        assert_eq!(
            orchestrator.sagas(),
            vec![first.saga_id().clone(), second.saga_id().clone()]
        );
    }

    #[test]
    fn started_saga_can_be_waited_on() {
        let orchestrator = orchestrator();
        orchestrator.register(echo_saga("echo")).expect("registration");

        let saga_id = orchestrator.start("echo", json!({})).expect("start");
        let report = orchestrator.wait(&saga_id).expect("wait");

        assert_eq!(report.status(), SagaStatus::Completed);
        assert_eq!(orchestrator.query(&saga_id).expect("query"), report);
    }

    #[test]
    fn cancelled_saga_compensates_after_current_step() {
        let orchestrator = orchestrator();
        let calls = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let counter = Arc::clone(&calls);
        let definition = SagaBuilder::<StepContext, OperationError>::new("slow")
            .first_step(StepSpec::new(
                "gate",
                move |_ctx: &StepContext, _inv, input| {
                    let _ = entered_tx.send(());
                    let _ = release_rx.lock().expect("lock").recv();
                    Ok(input)
                },
            ))
            .then(StepSpec::new("never", move |_ctx: &StepContext, _inv, input| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(input)
            }))
            .build();
        orchestrator.register(definition).expect("registration");

        let saga_id = orchestrator.start("slow", json!({})).expect("start");
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("step should start");
        orchestrator.cancel(&saga_id).expect("cancel");
        release_tx.send(()).expect("release step");
        let report = orchestrator.wait(&saga_id).expect("wait");

        assert_eq!(report.status(), SagaStatus::Compensated);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(report.entries[0].compensated);
    }

    #[test]
    fn every_transition_is_persisted() {
        let state_io = Arc::new(MockSagaStateIO::new());
        let orchestrator = SagaOrchestrator::with_state_io(
            Arc::new(InMemoryReplicaSet::default()),
            OrchestratorConfig::default(),
            state_io.clone(),
        );
        orchestrator.register(echo_saga("echo")).expect("registration");

        let report = orchestrator.run("echo", json!({})).expect("run");

        let saved = state_io.get(report.saga_id()).expect("snapshot saved");
        assert_eq!(saved.execution.status(), SagaStatus::Completed);
        assert_eq!(saved.entries.len(), 1);
        // submitted, running, step 0 logged, completed
        assert_eq!(state_io.save_count(), 4);
    }

    #[test]
    fn persistence_failure_surfaces_as_journal_error() {
        let orchestrator = SagaOrchestrator::with_state_io(
            Arc::new(InMemoryReplicaSet::default()),
            OrchestratorConfig::default(),
            Arc::new(FailingSagaStateIO),
        );
        orchestrator.register(echo_saga("echo")).expect("registration");

        let err = orchestrator
            .run("echo", json!({}))
            .expect_err("persistence failure should surface");

        assert!(matches!(err, OperationError::Journal { .. }));
    }

    #[test]
    fn recover_without_state_io_is_a_no_op() {
        let orchestrator = orchestrator();

        assert!(orchestrator.recover().expect("recover").is_empty());
    }

    #[test]
    fn archived_sagas_are_answered_from_their_snapshots() {
        let state_io = Arc::new(MockSagaStateIO::new());
        let orchestrator = SagaOrchestrator::with_state_io(
            Arc::new(InMemoryReplicaSet::default()),
            OrchestratorConfig::default(),
            state_io,
        );
        orchestrator.register(echo_saga("echo")).expect("registration");
        let first = orchestrator.run("echo", json!({"n": 1})).expect("run");
        let second = orchestrator.run("echo", json!({"n": 2})).expect("run");

        let archived = orchestrator.archive_finished();

        assert_eq!(archived, vec![first.saga_id().clone(), second.saga_id().clone()]);
        assert!(orchestrator.sagas().is_empty());
        assert!(orchestrator.log().saga_ids().is_empty());
        let report = orchestrator.query(first.saga_id()).expect("query archived");
        assert_eq!(report.status(), SagaStatus::Completed);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.executed_steps()[0].result, json!({"n": 1}));
        assert_eq!(
            orchestrator.wait(second.saga_id()).expect("wait archived").status(),
            SagaStatus::Completed
        );
        assert!(orchestrator.archive_finished().is_empty());
    }

    #[test]
    fn running_sagas_are_not_archived() {
        let orchestrator = orchestrator();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let definition = SagaBuilder::<StepContext, OperationError>::new("gated")
            .first_step(StepSpec::new(
                "gate",
                move |_ctx: &StepContext, _inv, input| {
                    let _ = entered_tx.send(());
                    let _ = release_rx.lock().expect("lock").recv();
                    Ok(input)
                },
            ))
            .build();
        orchestrator.register(definition).expect("registration");

        let saga_id = orchestrator.start("gated", json!({})).expect("start");
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("step should start");

        assert!(orchestrator.archive_finished().is_empty());
        release_tx.send(()).expect("release step");
        orchestrator.wait(&saga_id).expect("wait");
        assert_eq!(orchestrator.archive_finished(), vec![saga_id.clone()]);
        assert!(matches!(
            orchestrator.query(&saga_id),
            Err(OperationError::UnknownSaga(_))
        ));
    }
}
