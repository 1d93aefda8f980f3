use std::marker::PhantomData;

use crate::definition::{BoxedStep, SagaDefinition};
use crate::step::SagaStep;

/// Marker type for a builder with no steps.
pub struct Empty;

/// Marker type for a builder with at least one step.
pub struct HasSteps;

/// Type-state builder for saga definitions.
///
/// All steps share one context and error type. An empty saga cannot be built:
///
/// ```compile_fail
/// use sagalab_saga::SagaBuilder;
///
/// // `build()` is only available after `first_step()`
/// let saga = SagaBuilder::<(), ()>::new("empty").build();
/// ```
pub struct SagaBuilder<Ctx, Err, State = Empty> {
    id: String,
    steps: Vec<BoxedStep<Ctx, Err>>,
    _state: PhantomData<State>,
}

impl<Ctx, Err> SagaBuilder<Ctx, Err, Empty> {
    /// Create a new builder for the definition registered under `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            _state: PhantomData,
        }
    }

    /// Add the first step to the saga.
    #[must_use]
    pub fn first_step<S>(self, step: S) -> SagaBuilder<Ctx, Err, HasSteps>
    where
        S: SagaStep<Context = Ctx, Error = Err> + 'static,
    {
        let mut steps = self.steps;
        steps.push(Box::new(step));
        SagaBuilder {
            id: self.id,
            steps,
            _state: PhantomData,
        }
    }
}

impl<Ctx, Err> SagaBuilder<Ctx, Err, HasSteps> {
    /// Append another step; it runs after every step added before it.
    #[must_use]
    pub fn then<S>(mut self, step: S) -> Self
    where
        S: SagaStep<Context = Ctx, Error = Err> + 'static,
    {
        self.steps.push(Box::new(step));
        self
    }

    /// Build the definition from the accumulated steps.
    #[must_use]
    pub fn build(self) -> SagaDefinition<Ctx, Err> {
        SagaDefinition::from_steps(self.id, self.steps)
    }
}
