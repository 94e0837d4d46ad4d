//! Error Taxonomy
//!
//! Every failure the scheduler can see is one of these. The controller's
//! recovery policy is keyed off the variant, so new failure modes must be
//! added here rather than smuggled through `anyhow`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BatcherError {
    /// The collaborator does not know this target or host. Fatal for the
    /// current loop; the target must first be reachable.
    #[error("unknown target or host: {0}")]
    NotFound(String),

    /// The acting agent's capability level is below the target's
    /// requirement. The scheduler cannot raise capability itself.
    #[error("capability {have} below required {need} for target {target}")]
    CapabilityTooLow {
        target: String,
        need: u32,
        have: u32,
    },

    /// A job launch was rejected, or capacity vanished between planning and
    /// dispatch. Expected under shared capacity; recovered by re-prepping.
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    /// The fraction descent bottomed out without a plan that packs into the
    /// capacity budget. Recovered by waiting for capacity to free up.
    #[error("no plan fits the capacity budget below fraction {ceiling:.2}")]
    PlanUnfittable { ceiling: f64 },

    /// A dispatched batch did not land within its grace window. Treated the
    /// same as a dispatch failure: abort, re-prep, resume.
    #[error("batch {0} did not land within its grace window")]
    BatchTimeout(Uuid),
}

impl BatcherError {
    /// Whether the steady-state loop can recover without operator help.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BatcherError::NotFound(_))
    }
}

pub type BatcherResult<T> = Result<T, BatcherError>;
