//! Host Module
//!
//! The seam between the scheduler and the game runtime. Everything the core
//! needs from the host environment is behind [`GameHost`]; the runtime owns
//! all real state and all primitive operations.

mod sim;

pub use sim::SimHost;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::BatcherResult;
use crate::model::{OperationKind, Target};

/// Observed state of a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Done,
    Failed,
}

/// One job launch request: N threads of one operation kind against one
/// target, started after `start_delay`.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: OperationKind,
    pub host_id: String,
    pub target_id: String,
    pub threads: u32,
    pub start_delay: Duration,
}

/// Opaque handle to a launched job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: Uuid,
    pub kind: OperationKind,
    pub host_id: String,
}

/// The capabilities the core consumes from the game runtime, each an opaque
/// remote call.
#[async_trait]
pub trait GameHost: Send + Sync {
    /// Consistent snapshot of a target as of one point in time.
    async fn query_target(&self, id: &str) -> BatcherResult<Target>;

    /// Currently free capacity units on a worker host.
    async fn query_capacity(&self, host_id: &str) -> BatcherResult<f64>;

    /// The acting agent's current capability level.
    async fn query_capability(&self) -> BatcherResult<u32>;

    /// Launch a job. Fails if the worker host lacks the capacity for it.
    async fn dispatch_job(&self, spec: JobSpec) -> BatcherResult<JobHandle>;

    /// Poll a job's state.
    async fn job_status(&self, handle: &JobHandle) -> BatcherResult<JobStatus>;

    /// Suspend until the job leaves the running state. The default polls
    /// `job_status` on a short interval; hosts with native completion
    /// signals should override.
    async fn await_job(&self, handle: &JobHandle) -> BatcherResult<JobStatus> {
        let mut tick = tokio::time::interval(Duration::from_millis(20));
        loop {
            tick.tick().await;
            match self.job_status(handle).await? {
                JobStatus::Running => continue,
                terminal => return Ok(terminal),
            }
        }
    }
}
