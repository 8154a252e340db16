//! Local and remote step dispatch.
//!
//! The engine never branches on the execution mode itself. It is handed one
//! [`StepDispatcher`] per run and routes every block invocation through it.

use anyhow::Result;
use async_trait::async_trait;
use tracing::trace;
use visionflow_registry::{BlockInputs, BlockResult, StepExecutionMode, WorkflowBlock};

/// Routes block invocations to a backend.
#[async_trait]
pub trait StepDispatcher: Send + Sync {
    fn mode(&self) -> StepExecutionMode;

    /// Upper bound on invocations of one step in flight at once.
    fn max_concurrency(&self) -> usize {
        1
    }

    /// Largest batch handed to a batch-accepting block in one call; `None` means unbounded.
    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    async fn dispatch(&self, block: &dyn WorkflowBlock, inputs: BlockInputs) -> Result<BlockResult>;
}

/// Serves every invocation in-process, one at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDispatcher;

#[async_trait]
impl StepDispatcher for LocalDispatcher {
    fn mode(&self) -> StepExecutionMode {
        StepExecutionMode::Local
    }

    async fn dispatch(&self, block: &dyn WorkflowBlock, inputs: BlockInputs) -> Result<BlockResult> {
        trace!(step = %inputs.step_name(), "dispatching locally");
        block.run_locally(inputs).await
    }
}

/// Serves invocations through the blocks' remote backends with bounded fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteDispatcher {
    max_concurrent_requests: usize,
    max_batch_size: usize,
}

impl RemoteDispatcher {
    /// Both limits are clamped to at least one.
    pub fn new(max_concurrent_requests: usize, max_batch_size: usize) -> Self {
        Self {
            max_concurrent_requests: max_concurrent_requests.max(1),
            max_batch_size: max_batch_size.max(1),
        }
    }
}

#[async_trait]
impl StepDispatcher for RemoteDispatcher {
    fn mode(&self) -> StepExecutionMode {
        StepExecutionMode::Remote
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrent_requests
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(self.max_batch_size)
    }

    async fn dispatch(&self, block: &dyn WorkflowBlock, inputs: BlockInputs) -> Result<BlockResult> {
        trace!(step = %inputs.step_name(), "dispatching remotely");
        block.run_remotely(inputs).await
    }
}
