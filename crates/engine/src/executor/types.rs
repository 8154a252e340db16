//! Executor result types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use visionflow_types::FlowControl;

/// Terminal state of one step in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step ran and its output was recorded.
    Succeeded,
    /// Not invoked because a flow-control step terminated its branch.
    Skipped,
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step name, unique within the workflow.
    pub name: String,
    /// Discriminator of the block that served the step.
    pub block_type: String,
    /// Final status of this step in the run.
    pub status: StepStatus,
    /// Number of block invocations: one per element when fanned out, one per
    /// chunk for batch-accepting blocks, zero when skipped.
    pub invocations: usize,
    /// Signal the step returned; `Continue` for skipped steps.
    pub flow_control: FlowControl,
}

/// Result of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunResult {
    /// Declared workflow outputs in declaration order; skipped steps project to `null`.
    pub outputs: IndexMap<String, Value>,
    /// One report per step, in execution order.
    pub steps: Vec<StepReport>,
}

impl WorkflowRunResult {
    /// Projected value of a declared workflow output.
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|report| report.name == name)
    }

    /// Names of skipped steps, in execution order.
    pub fn skipped_steps(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter(|report| report.status == StepStatus::Skipped)
            .map(|report| report.name.as_str())
    }
}
