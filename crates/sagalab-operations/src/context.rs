use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sagalab_causal::{LogicalClock, Session};
use sagalab_core::{
    ActorId, ReadConcern, ReadResult, SagaId, SessionId, Timestamp, WriteAck, WriteConcern,
};
use sagalab_saga::StepInvocation;
use serde_json::Value;

use crate::Result;
use crate::config::ConsistencyConfig;
use crate::error::OperationError;
use crate::executor::{StepExecutor, StoreOutcome, StoreRequest};

/// What a saga's steps get to work with.
///
/// Each saga invocation is its own actor: it owns a logical clock named
/// `saga:<id>` and a causal session `session:<id>`, and every store call made
/// through the context goes through the shared [`StepExecutor`].
pub struct StepContext {
    saga_id: SagaId,
    executor: Arc<StepExecutor>,
    clock: LogicalClock,
    session: Mutex<Session>,
    consistency: ConsistencyConfig,
}

impl StepContext {
    #[must_use]
    pub fn new(
        saga_id: SagaId,
        executor: Arc<StepExecutor>,
        consistency: ConsistencyConfig,
    ) -> Self {
        let clock = LogicalClock::new(ActorId::new(format!("saga:{saga_id}")));
        let session = Session::for_saga(
            SessionId::new(format!("session:{saga_id}")),
            saga_id.clone(),
        );
        Self {
            saga_id,
            executor,
            clock,
            session: Mutex::new(session),
            consistency,
        }
    }

    /// Context of a saga picked up after a restart.
    ///
    /// The clock resumes past both `clock` and everything `session` observed,
    /// so no timestamp issued before the restart is handed out again.
    #[must_use]
    pub fn restore(
        saga_id: SagaId,
        executor: Arc<StepExecutor>,
        consistency: ConsistencyConfig,
        clock: Timestamp,
        session: Option<Session>,
    ) -> Self {
        let mut ctx = Self::new(saga_id, executor, consistency);
        if let Some(session) = session {
            ctx.clock = LogicalClock::starting_at(
                ctx.clock.actor().clone(),
                clock.max(session.high_water_mark()),
            );
            ctx.session = Mutex::new(session);
        } else {
            ctx.clock = LogicalClock::starting_at(ctx.clock.actor().clone(), clock);
        }
        ctx
    }

    #[must_use]
    pub fn saga_id(&self) -> &SagaId {
        &self.saga_id
    }

    #[must_use]
    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    #[must_use]
    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    /// Copy of the causal session as it stands.
    #[must_use]
    pub fn session(&self) -> Session {
        self.lock_session().clone()
    }

    #[must_use]
    pub fn write_concern(&self) -> WriteConcern {
        self.consistency.write_concern()
    }

    #[must_use]
    pub fn read_concern(&self) -> ReadConcern {
        self.consistency.read_concern()
    }

    /// Dispatch a prepared request on this saga's clock and session.
    ///
    /// # Errors
    ///
    /// Returns the store failure left after retries.
    pub fn execute(&self, request: &StoreRequest) -> Result<StoreOutcome> {
        let mut session = self.lock_session();
        Ok(self.executor.execute(&self.clock, &mut session, request)?)
    }

    /// Read `key` with the configured read concern.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn read(&self, key: &str) -> Result<ReadResult> {
        self.read_with(key, self.read_concern())
    }

    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn read_with(&self, key: &str, concern: ReadConcern) -> Result<ReadResult> {
        match self.execute(&StoreRequest::read(key, concern))? {
            StoreOutcome::Read { result, .. } => Ok(result),
            StoreOutcome::Written { .. } => Err(unexpected_outcome(key)),
        }
    }

    /// Write `payload` to `key` on behalf of `invocation`.
    ///
    /// When the step declares an idempotency key, the write carries
    /// `<invocation-key>:<store-key>` so a retried or replayed step is applied
    /// at most once. `expected` is the optimistic precondition on the key's
    /// current version (`Timestamp::ZERO` for "must not exist").
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn write(
        &self,
        invocation: &StepInvocation,
        key: &str,
        payload: Value,
        expected: Option<Timestamp>,
    ) -> Result<WriteAck> {
        let request = StoreRequest::write(key, payload, self.write_concern())
            .idempotent(invocation.idempotency_key().map(|k| format!("{k}:{key}")))
            .expecting(expected);
        match self.execute(&request)? {
            StoreOutcome::Written { ack } => Ok(ack),
            StoreOutcome::Read { .. } => Err(unexpected_outcome(key)),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unexpected_outcome(key: &str) -> OperationError {
    OperationError::Saga(format!("store returned the wrong outcome kind for '{key}'"))
}

#[cfg(test)]
mod tests {
    use sagalab_causal::CausalTracker;
    use sagalab_saga::StepPhase;
    use serde_json::json;

    use super::*;
    use crate::providers::InMemoryReplicaSet;

    fn context(store: Arc<InMemoryReplicaSet>) -> StepContext {
        let executor = StepExecutor::new(store, Arc::new(CausalTracker::new()));
        StepContext::new(
            SagaId::from("quiet-lynx-1"),
            Arc::new(executor),
            ConsistencyConfig::default(),
        )
    }

    #[test]
    fn context_is_its_own_actor_and_session() {
        let ctx = context(Arc::new(InMemoryReplicaSet::default()));

        assert_eq!(ctx.clock().actor().as_str(), "saga:quiet-lynx-1");
        assert_eq!(ctx.session().id().as_str(), "session:quiet-lynx-1");
        assert_eq!(ctx.session().saga(), Some(&SagaId::from("quiet-lynx-1")));
    }

    #[test]
    fn read_your_writes_through_the_session() {
        let store = Arc::new(InMemoryReplicaSet::default());
        let ctx = context(Arc::clone(&store));
        let invocation = ctx_invocation();

        let ack = ctx
            .write(&invocation, "users:ana", json!({"balance": 500}), None)
            .expect("write should succeed");
        let read = ctx.read("users:ana").expect("read should succeed");

        assert_eq!(read.timestamp(), Some(ack.timestamp));
        assert_eq!(ctx.session().prior_max("users:ana"), ack.timestamp);
        assert!(ctx.executor().tracker().violations().is_empty());
    }

    #[test]
    fn must_not_exist_precondition_rejects_existing_key() {
        let store = Arc::new(InMemoryReplicaSet::default());
        store.seed("orders:1", json!({"status": "pending"}));
        let ctx = context(Arc::clone(&store));

        let err = ctx
            .write(&ctx_invocation(), "orders:1", json!({}), Some(Timestamp::ZERO))
            .expect_err("existing key should conflict");

        assert!(matches!(
            err.store_error(),
            Some(sagalab_core::StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn restored_context_continues_past_persisted_state() {
        let executor = Arc::new(StepExecutor::new(
            Arc::new(InMemoryReplicaSet::default()),
            Arc::new(CausalTracker::new()),
        ));
        let mut session = Session::for_saga(
            SessionId::from("session:quiet-lynx-1"),
            SagaId::from("quiet-lynx-1"),
        );
        session.observe("users:ana", Timestamp::new(40));

        let ctx = StepContext::restore(
            SagaId::from("quiet-lynx-1"),
            executor,
            ConsistencyConfig::default(),
            Timestamp::new(25),
            Some(session),
        );

        assert_eq!(ctx.clock().current(), Timestamp::new(40));
        assert_eq!(ctx.session().prior_max("users:ana"), Timestamp::new(40));
        let ack = ctx
            .write(&ctx_invocation(), "users:bo", json!({}), None)
            .expect("write should succeed");
        assert!(ack.timestamp > Timestamp::new(40));
    }

    fn ctx_invocation() -> StepInvocation {
        StepInvocation::new(
            &SagaId::from("quiet-lynx-1"),
            0,
            "test_step",
            StepPhase::Forward,
            None,
        )
    }
}
