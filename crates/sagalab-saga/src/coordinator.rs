use std::fmt::{Debug, Display};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::definition::SagaDefinition;
use crate::error::{CompensationError, FailureCause, SagaError};
use crate::execution::{FailureKind, SagaExecution, SagaStatus, StepFailure};
use crate::journal::{NoopJournal, SagaJournal};
use crate::log::{CompensationLog, CompensationLogEntry};
use crate::step::{SagaStep, StepInvocation, StepPhase};

static NOOP_JOURNAL: NoopJournal = NoopJournal;

/// Per-run knobs for the coordinator.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Upper bound for a single forward action. Checked after the step
    /// returns; an overrunning step is logged (if it succeeded) and then
    /// compensated.
    pub step_timeout: Option<Duration>,
    pub cancellation: CancellationToken,
}

/// How a saga run ended when no compensation failed.
#[derive(Debug)]
pub enum SagaOutcome<E> {
    /// Every step succeeded; `output` is the last step's result.
    Completed { output: Value },
    /// A step failed and every logged step was rolled back.
    Compensated {
        failed_step: String,
        cause: FailureCause<E>,
    },
}

impl<E> SagaOutcome<E> {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Drives one [`SagaExecution`] through the state machine of its definition.
///
/// Forward actions run strictly in order. Each success is appended to the
/// [`CompensationLog`] before the execution advances, and the journal sees a
/// checkpoint after every change. On failure the log is walked in reverse and
/// every uncompensated entry gets its compensation, even if an earlier one
/// failed.
pub struct SagaCoordinator<'a, Ctx, Err> {
    definition: &'a SagaDefinition<Ctx, Err>,
    log: &'a CompensationLog,
    journal: &'a dyn SagaJournal,
    options: RunOptions,
}

impl<'a, Ctx, Err> SagaCoordinator<'a, Ctx, Err>
where
    Err: Debug + Display,
{
    #[must_use]
    pub fn new(definition: &'a SagaDefinition<Ctx, Err>, log: &'a CompensationLog) -> Self {
        Self {
            definition,
            log,
            journal: &NOOP_JOURNAL,
            options: RunOptions::default(),
        }
    }

    #[must_use]
    pub fn with_journal(mut self, journal: &'a dyn SagaJournal) -> Self {
        self.journal = journal;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the execution from whatever state it is in until it is terminal.
    ///
    /// `Pending` starts at step 0, `Running` continues at `current_index`,
    /// `Compensating` finishes the rollback.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::CompensationFailed`] when the saga ends `Failed`,
    /// [`SagaError::Journal`] when a checkpoint cannot be written, and a
    /// precondition error when the execution is terminal or belongs to another
    /// definition.
    pub fn run(
        &self,
        ctx: &Ctx,
        execution: &mut SagaExecution,
    ) -> Result<SagaOutcome<Err>, SagaError<Err>> {
        self.check_definition(execution)?;

        match execution.status() {
            SagaStatus::Pending => {
                self.transition(execution, SagaStatus::Running)?;
                info!(
                    saga_id = %execution.saga_id(),
                    definition = self.definition.id(),
                    steps = self.definition.len(),
                    "saga started"
                );
                self.checkpoint(execution)?;
                self.run_forward(ctx, execution)
            }
            SagaStatus::Running => self.run_forward(ctx, execution),
            SagaStatus::Compensating => {
                let (failed_step, reason) = execution.failure().map_or_else(
                    || (String::new(), "compensation was interrupted".to_string()),
                    |f| (f.step_name.clone(), f.reason.clone()),
                );
                self.run_compensation(
                    ctx,
                    execution,
                    failed_step,
                    FailureCause::Interrupted { reason },
                )
            }
            status => Err(SagaError::AlreadyTerminal {
                saga_id: execution.saga_id().clone(),
                status,
            }),
        }
    }

    /// Continue an execution reloaded after a crash.
    ///
    /// A `Running` saga only moves forward again when its pending step
    /// declares an idempotency key, since the step may already have been
    /// applied. Otherwise the logged steps are compensated.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn resume(
        &self,
        ctx: &Ctx,
        execution: &mut SagaExecution,
    ) -> Result<SagaOutcome<Err>, SagaError<Err>> {
        self.check_definition(execution)?;

        if execution.status() == SagaStatus::Running {
            let index = execution.current_index();
            let logged = self
                .log
                .entries(execution.saga_id())
                .iter()
                .any(|e| e.step_index == index);
            if let Some(step) = self.definition.step(index) {
                if !logged && step.idempotency_key().is_none() {
                    warn!(
                        saga_id = %execution.saga_id(),
                        step = step.name(),
                        "pending step is not idempotent; compensating instead of resuming"
                    );
                    let reason = format!("step '{}' may have been partially applied", step.name());
                    let failure = StepFailure {
                        step_index: index,
                        step_name: step.name().to_string(),
                        kind: FailureKind::Interrupted,
                        reason: reason.clone(),
                    };
                    return self.fail_and_compensate(
                        ctx,
                        execution,
                        failure,
                        FailureCause::Interrupted { reason },
                    );
                }
            }
        }
        self.run(ctx, execution)
    }

    fn run_forward(
        &self,
        ctx: &Ctx,
        execution: &mut SagaExecution,
    ) -> Result<SagaOutcome<Err>, SagaError<Err>> {
        while let Some(step) = self.definition.step(execution.current_index()) {
            let index = execution.current_index();

            if self.options.cancellation.is_cancelled() {
                return self.cancel(ctx, execution, index, step.name());
            }

            if let Some(entry) = self.logged_entry(execution, index) {
                debug!(
                    saga_id = %execution.saga_id(),
                    step = step.name(),
                    "step already logged; reusing its result"
                );
                execution.record_step(index, step.name(), entry.forward_result);
                self.checkpoint(execution)?;
                continue;
            }

            let input = execution.next_input();
            let invocation = StepInvocation::new(
                execution.saga_id(),
                index,
                step.name(),
                StepPhase::Forward,
                step.idempotency_key(),
            );

            debug!(saga_id = %execution.saga_id(), step = step.name(), index, "executing step");
            let started = Instant::now();
            let result = step.execute(ctx, &invocation, input.clone());
            let elapsed = started.elapsed();

            let output = match result {
                Ok(output) => output,
                Err(error) => {
                    warn!(
                        saga_id = %execution.saga_id(),
                        step = step.name(),
                        error = %error,
                        "step failed"
                    );
                    let failure = StepFailure {
                        step_index: index,
                        step_name: step.name().to_string(),
                        kind: FailureKind::StepError,
                        reason: error.to_string(),
                    };
                    return self.fail_and_compensate(
                        ctx,
                        execution,
                        failure,
                        FailureCause::Step(error),
                    );
                }
            };

            self.log.append(CompensationLogEntry::new(
                execution.saga_id().clone(),
                index,
                step.name(),
                input,
                output.clone(),
                step.compensation_description(),
            ));
            execution.record_step(index, step.name(), output);
            self.checkpoint(execution)?;
            debug!(
                saga_id = %execution.saga_id(),
                step = step.name(),
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "step completed"
            );

            if let Some(limit) = self.options.step_timeout.filter(|limit| elapsed > *limit) {
                warn!(
                    saga_id = %execution.saga_id(),
                    step = step.name(),
                    "step exceeded its timeout"
                );
                let cause = FailureCause::DeadlineExceeded { elapsed, limit };
                let failure = StepFailure {
                    step_index: index,
                    step_name: step.name().to_string(),
                    kind: FailureKind::DeadlineExceeded,
                    reason: cause.to_string(),
                };
                return self.fail_and_compensate(ctx, execution, failure, cause);
            }

            // A cancel that arrived while the step ran wins over its success.
            if self.options.cancellation.is_cancelled() {
                return self.cancel(ctx, execution, index, step.name());
            }
        }

        self.transition(execution, SagaStatus::Completed)?;
        self.checkpoint(execution)?;
        info!(saga_id = %execution.saga_id(), "saga completed");

        Ok(SagaOutcome::Completed {
            output: execution.next_input(),
        })
    }

    fn cancel(
        &self,
        ctx: &Ctx,
        execution: &mut SagaExecution,
        index: usize,
        step_name: &str,
    ) -> Result<SagaOutcome<Err>, SagaError<Err>> {
        info!(saga_id = %execution.saga_id(), step = step_name, "saga cancelled");
        let failure = StepFailure {
            step_index: index,
            step_name: step_name.to_string(),
            kind: FailureKind::Cancelled,
            reason: "cancelled".to_string(),
        };
        self.fail_and_compensate(ctx, execution, failure, FailureCause::Cancelled)
    }

    fn fail_and_compensate(
        &self,
        ctx: &Ctx,
        execution: &mut SagaExecution,
        failure: StepFailure,
        cause: FailureCause<Err>,
    ) -> Result<SagaOutcome<Err>, SagaError<Err>> {
        let failed_step = failure.step_name.clone();
        execution.set_failure(failure);
        self.transition(execution, SagaStatus::Compensating)?;
        info!(saga_id = %execution.saga_id(), failed_step = %failed_step, "saga compensating");
        self.checkpoint(execution)?;
        self.run_compensation(ctx, execution, failed_step, cause)
    }

    fn run_compensation(
        &self,
        ctx: &Ctx,
        execution: &mut SagaExecution,
        failed_step: String,
        cause: FailureCause<Err>,
    ) -> Result<SagaOutcome<Err>, SagaError<Err>> {
        let saga_id = execution.saga_id().clone();
        let mut compensation_errors = Vec::new();

        for entry in self.log.pending_compensation(&saga_id) {
            let step = self
                .definition
                .step(entry.step_index)
                .ok_or_else(|| SagaError::UnknownStep {
                    saga_id: saga_id.clone(),
                    index: entry.step_index,
                })?;
            let invocation = StepInvocation::new(
                &saga_id,
                entry.step_index,
                step.name(),
                StepPhase::Compensate,
                step.idempotency_key(),
            );

            debug!(saga_id = %saga_id, step = step.name(), "compensating step");
            match step.compensate(ctx, &invocation, entry.input, entry.forward_result) {
                Ok(()) => {
                    self.log.mark_compensated(&saga_id, entry.step_index);
                    info!(saga_id = %saga_id, step = step.name(), "step compensated");
                }
                Err(error) => {
                    warn!(
                        saga_id = %saga_id,
                        step = step.name(),
                        error = %error,
                        "compensation failed"
                    );
                    self.log
                        .record_compensation_failure(&saga_id, entry.step_index, error.to_string());
                    compensation_errors.push(CompensationError {
                        step: step.name().to_string(),
                        step_index: entry.step_index,
                        description: entry.compensation_description,
                        error,
                    });
                }
            }
            self.checkpoint(execution)?;
        }

        if compensation_errors.is_empty() {
            self.transition(execution, SagaStatus::Compensated)?;
            self.checkpoint(execution)?;
            info!(saga_id = %saga_id, "saga compensated");
            Ok(SagaOutcome::Compensated { failed_step, cause })
        } else {
            self.transition(execution, SagaStatus::Failed)?;
            self.checkpoint(execution)?;
            warn!(
                saga_id = %saga_id,
                failures = compensation_errors.len(),
                "saga failed; manual intervention required"
            );
            Err(SagaError::CompensationFailed {
                saga_id,
                failed_step,
                cause,
                compensation_errors,
            })
        }
    }

    fn logged_entry(
        &self,
        execution: &SagaExecution,
        index: usize,
    ) -> Option<CompensationLogEntry> {
        self.log
            .entries(execution.saga_id())
            .into_iter()
            .find(|e| e.step_index == index)
    }

    fn check_definition(&self, execution: &SagaExecution) -> Result<(), SagaError<Err>> {
        if execution.definition_id() == self.definition.id() {
            Ok(())
        } else {
            Err(SagaError::DefinitionMismatch {
                saga_id: execution.saga_id().clone(),
                expected: self.definition.id().to_string(),
                found: execution.definition_id().to_string(),
            })
        }
    }

    fn transition(
        &self,
        execution: &mut SagaExecution,
        to: SagaStatus,
    ) -> Result<(), SagaError<Err>> {
        execution
            .transition(to)
            .map_err(|from| SagaError::InvalidTransition {
                saga_id: execution.saga_id().clone(),
                from,
                to,
            })
    }

    fn checkpoint(&self, execution: &SagaExecution) -> Result<(), SagaError<Err>> {
        let entries = self.log.entries(execution.saga_id());
        self.journal.checkpoint(execution, &entries)?;
        Ok(())
    }
}
