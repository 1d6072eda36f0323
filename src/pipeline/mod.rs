//! Step sequencing over a shared workflow context.
//!
//! Steps run strictly in registration order. A step that returns an error is
//! marked failed and halts the run: later steps stay pending, and whatever the
//! completed steps (and the failing one) already wrote to the context and the
//! ledger is kept. The orchestrator never retries; a step that wants retries
//! implements them itself.
use crate::context::{WorkflowContext, STEP_PROGRESS};
use crate::provenance::ProvenanceLedger;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// A named unit of work with a bounded contract over the context.
pub trait Step {
    /// Unique within a pipeline.
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Read upstream keys, write owned keys, and record provenance.
    fn run(&self, ctx: &mut WorkflowContext, ledger: &mut ProvenanceLedger) -> Result<()>;
}

/// Lifecycle: `Pending -> Running -> Completed | Failed`, back to `Pending` only on reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
struct StepState {
    status: StepStatus,
    error: Option<String>,
    duration: Option<Duration>,
}

struct StepSlot<'a> {
    step: Box<dyn Step + 'a>,
    state: StepState,
}

/// Per-step status as exposed to callers and stored under `step_progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub description: String,
    /// 1-based position in the pipeline.
    pub step_number: usize,
    pub total_steps: usize,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallProgress {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub pending_steps: usize,
    pub progress_percentage: f64,
}

/// The step that halted a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub name: String,
    /// 1-based position in the pipeline.
    pub position: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub completed: bool,
    pub failure: Option<StepFailure>,
}

/// Ordered steps sharing one context and ledger.
///
/// Each step's status, timing, and error are tracked here; the context's
/// `step_progress` entry mirrors them after every step.
#[derive(Default)]
pub struct Pipeline<'a> {
    steps: Vec<StepSlot<'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Names must be unique.
    pub fn add_step(&mut self, step: impl Step + 'a) -> Result<()> {
        if self.steps.iter().any(|slot| slot.step.name() == step.name()) {
            return Err(anyhow!("duplicate step name {}", step.name()));
        }
        self.steps.push(StepSlot {
            step: Box::new(step),
            state: StepState::default(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order, halting at the first failure.
    ///
    /// Fails without running anything when a previous run has not been reset.
    pub fn execute(
        &mut self,
        ctx: &mut WorkflowContext,
        ledger: &mut ProvenanceLedger,
    ) -> Result<RunOutcome> {
        if let Some(slot) = self
            .steps
            .iter()
            .find(|slot| slot.state.status != StepStatus::Pending)
        {
            return Err(anyhow!(
                "step {} is {}; reset the pipeline before executing again",
                slot.step.name(),
                slot.state.status
            ));
        }

        // Replace whatever progress an earlier run left in the context.
        ctx.insert(STEP_PROGRESS, &self.reports())?;
        let mut failure = None;
        for idx in 0..self.steps.len() {
            failure = self.run_step(idx, ctx, ledger);
            ctx.insert(STEP_PROGRESS, &self.reports())?;
            if failure.is_some() {
                break;
            }
        }

        Ok(RunOutcome {
            completed: failure.is_none(),
            failure,
        })
    }

    fn run_step(
        &mut self,
        idx: usize,
        ctx: &mut WorkflowContext,
        ledger: &mut ProvenanceLedger,
    ) -> Option<StepFailure> {
        let total = self.steps.len();
        let slot = &mut self.steps[idx];
        let position = idx + 1;
        let name = slot.step.name().to_string();
        slot.state.status = StepStatus::Running;
        tracing::info!(step = %name, position, total, "step started");

        let start = Instant::now();
        let result = slot.step.run(ctx, ledger);
        let elapsed = start.elapsed();
        slot.state.duration = Some(elapsed);

        match result {
            Ok(()) => {
                slot.state.status = StepStatus::Completed;
                tracing::info!(
                    step = %name,
                    position,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "step completed"
                );
                None
            }
            Err(err) => {
                let error = format!("{err:#}");
                slot.state.status = StepStatus::Failed;
                slot.state.error = Some(error.clone());
                tracing::error!(
                    step = %name,
                    position,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "step failed; halting pipeline"
                );
                Some(StepFailure {
                    name,
                    position,
                    error,
                })
            }
        }
    }

    /// Return every step to pending and forget errors and timings.
    ///
    /// The ledger is untouched; it spans runs. A context passed to an earlier
    /// run keeps its `step_progress` until the next `execute` rewrites it.
    pub fn reset(&mut self) {
        for slot in &mut self.steps {
            slot.state = StepState::default();
        }
    }

    pub fn reports(&self) -> Vec<StepReport> {
        let total = self.steps.len();
        self.steps
            .iter()
            .enumerate()
            .map(|(idx, slot)| StepReport {
                name: slot.step.name().to_string(),
                description: slot.step.description().to_string(),
                step_number: idx + 1,
                total_steps: total,
                status: slot.state.status,
                duration_ms: slot.state.duration.map(|d| d.as_millis() as u64),
                error: slot.state.error.clone(),
            })
            .collect()
    }

    pub fn step_status(&self, name: &str) -> Option<StepReport> {
        self.reports().into_iter().find(|report| report.name == name)
    }

    pub fn overall_progress(&self) -> OverallProgress {
        let total_steps = self.steps.len();
        let count = |status: StepStatus| {
            self.steps
                .iter()
                .filter(|slot| slot.state.status == status)
                .count()
        };
        let completed_steps = count(StepStatus::Completed);
        let failed_steps = count(StepStatus::Failed);
        let progress_percentage = if total_steps == 0 {
            0.0
        } else {
            completed_steps as f64 / total_steps as f64 * 100.0
        };
        OverallProgress {
            total_steps,
            completed_steps,
            failed_steps,
            pending_steps: total_steps - completed_steps - failed_steps,
            progress_percentage,
        }
    }
}
