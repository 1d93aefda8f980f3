use std::fmt;

use sagalab_core::SagaId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a step is running forward or being undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Forward,
    Compensate,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Compensate => f.write_str("compensate"),
        }
    }
}

/// Per-call facts the coordinator hands to a step.
///
/// The idempotency key is scoped to the saga invocation, so a step declaring
/// `"create_order"` yields `"<saga-id>:create_order"` for its forward action and
/// `"<saga-id>:create_order:compensate"` for its compensation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInvocation {
    pub saga_id: SagaId,
    pub step_index: usize,
    pub step_name: String,
    pub phase: StepPhase,
    idempotency_key: Option<String>,
}

impl StepInvocation {
    #[must_use]
    pub fn new(
        saga_id: &SagaId,
        step_index: usize,
        step_name: &str,
        phase: StepPhase,
        declared_key: Option<&str>,
    ) -> Self {
        let idempotency_key = declared_key.map(|key| match phase {
            StepPhase::Forward => format!("{saga_id}:{key}"),
            StepPhase::Compensate => format!("{saga_id}:{key}:compensate"),
        });
        Self {
            saga_id: saga_id.clone(),
            step_index,
            step_name: step_name.to_string(),
            phase,
            idempotency_key,
        }
    }

    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        self.idempotency_key.is_some()
    }
}

/// A step in a saga that can be executed and compensated.
///
/// Each step transforms an input into an output, with the ability to undo its
/// effects if a later step fails. The coordinator keeps the original input and
/// the forward result in the compensation log and hands both back to
/// [`compensate`](SagaStep::compensate).
///
/// Compensations must be idempotent and tolerate a partially applied forward
/// action; the coordinator does not check this.
pub trait SagaStep: Send + Sync {
    /// Shared context providing dependencies.
    type Context;

    /// Error type for step failures.
    type Error;

    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Declared idempotency key. Steps without one are never retried on timeout.
    fn idempotency_key(&self) -> Option<&str> {
        None
    }

    /// Execute the step, transforming input into output.
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails to complete.
    fn execute(
        &self,
        ctx: &Self::Context,
        invocation: &StepInvocation,
        input: Value,
    ) -> Result<Value, Self::Error>;

    /// Compensate (undo) the step's effects.
    ///
    /// The default implementation is a no-op, suitable for read-only steps.
    ///
    /// # Errors
    ///
    /// Returns an error if compensation fails.
    fn compensate(
        &self,
        ctx: &Self::Context,
        invocation: &StepInvocation,
        input: Value,
        forward_result: Value,
    ) -> Result<(), Self::Error> {
        let _ = (ctx, invocation, input, forward_result);
        Ok(())
    }

    /// Human-readable description of what compensation will do.
    fn compensation_description(&self) -> String {
        format!("undo {}", self.name())
    }
}

type ForwardFn<Ctx, Err> =
    Box<dyn Fn(&Ctx, &StepInvocation, Value) -> Result<Value, Err> + Send + Sync>;
type CompensateFn<Ctx, Err> =
    Box<dyn Fn(&Ctx, &StepInvocation, Value, Value) -> Result<(), Err> + Send + Sync>;

/// A step assembled from closures: name, forward action, compensating action
/// and idempotency key.
pub struct StepSpec<Ctx, Err> {
    name: String,
    forward: ForwardFn<Ctx, Err>,
    compensation: Option<CompensateFn<Ctx, Err>>,
    description: Option<String>,
    idempotency_key: Option<String>,
}

impl<Ctx, Err> StepSpec<Ctx, Err> {
    pub fn new<F>(name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(&Ctx, &StepInvocation, Value) -> Result<Value, Err> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            forward: Box::new(forward),
            compensation: None,
            description: None,
            idempotency_key: None,
        }
    }

    #[must_use]
    pub fn compensate_with<F>(mut self, compensation: F) -> Self
    where
        F: Fn(&Ctx, &StepInvocation, Value, Value) -> Result<(), Err> + Send + Sync + 'static,
    {
        self.compensation = Some(Box::new(compensation));
        self
    }

    #[must_use]
    pub fn describe_compensation(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn idempotent(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

impl<Ctx, Err> SagaStep for StepSpec<Ctx, Err> {
    type Context = Ctx;
    type Error = Err;

    fn name(&self) -> &str {
        &self.name
    }

    fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    fn execute(&self, ctx: &Ctx, invocation: &StepInvocation, input: Value) -> Result<Value, Err> {
        (self.forward)(ctx, invocation, input)
    }

    fn compensate(
        &self,
        ctx: &Ctx,
        invocation: &StepInvocation,
        input: Value,
        forward_result: Value,
    ) -> Result<(), Err> {
        match &self.compensation {
            Some(compensation) => compensation(ctx, invocation, input, forward_result),
            None => Ok(()),
        }
    }

    fn compensation_description(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("undo {}", self.name))
    }
}
