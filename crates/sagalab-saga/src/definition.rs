use crate::step::SagaStep;

pub(crate) type BoxedStep<Ctx, Err> = Box<dyn SagaStep<Context = Ctx, Error = Err>>;

/// A static, ordered list of steps registered once per saga type.
///
/// Built with [`SagaBuilder`](crate::SagaBuilder), which guarantees at least
/// one step.
pub struct SagaDefinition<Ctx, Err> {
    id: String,
    steps: Vec<BoxedStep<Ctx, Err>>,
}

impl<Ctx, Err> SagaDefinition<Ctx, Err> {
    pub(crate) fn from_steps(id: String, steps: Vec<BoxedStep<Ctx, Err>>) -> Self {
        Self { id, steps }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for builder-made definitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn step(&self, index: usize) -> Option<&dyn SagaStep<Context = Ctx, Error = Err>> {
        self.steps.get(index).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl<Ctx, Err> std::fmt::Debug for SagaDefinition<Ctx, Err> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("id", &self.id)
            .field("steps", &self.step_names())
            .finish()
    }
}
