//! Batch Module
//!
//! One batch is one coordinated dispatch of WEAKEN+GROW+HACK jobs whose
//! effects are timed to land together. At most one batch is in flight per
//! target per pool; overlapping batches would interfere through their
//! security side effects.

mod controller;
mod dispatch;
mod prep;

pub use controller::{BatchController, CycleOutcome};
pub use dispatch::{BatchDispatcher, InFlightBatch};
pub use prep::PrepLoop;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::planner::Plan;

/// Lifecycle of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Planned,
    Dispatching,
    InFlight,
    Landed,
    Failed,
}

impl BatchState {
    fn can_advance_to(self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Planned, Dispatching)
                | (Dispatching, InFlight)
                | (Dispatching, Failed)
                | (InFlight, Landed)
                | (InFlight, Failed)
        )
    }
}

/// Bookkeeping for one batch, kept for logging and recovery decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: Uuid,
    pub target_id: String,
    pub extraction_fraction: f64,
    pub threads: crate::planner::RawThreads,
    pub state: BatchState,
    pub created_at: DateTime<Utc>,
    pub landed_at: Option<DateTime<Utc>>,
}

impl BatchRecord {
    pub fn new(target_id: impl Into<String>, plan: &Plan) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            extraction_fraction: plan.extraction_fraction,
            threads: plan.threads,
            state: BatchState::Planned,
            created_at: Utc::now(),
            landed_at: None,
        }
    }

    /// Advance the state machine. Illegal edges are programmer errors; they
    /// are logged and ignored rather than corrupting the record.
    pub fn advance(&mut self, next: BatchState) {
        if !self.state.can_advance_to(next) {
            warn!(batch = %self.id, from = ?self.state, to = ?next, "illegal batch transition");
            return;
        }
        self.state = next;
        if next == BatchState::Landed {
            self.landed_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::RawThreads;

    fn record() -> BatchRecord {
        let plan = Plan {
            extraction_fraction: 0.5,
            threads: RawThreads {
                weaken: 5,
                grow: 37,
                hack: 50,
            },
            capacity_required: 158.5,
            fits: true,
        };
        BatchRecord::new("n00dles", &plan)
    }

    #[test]
    fn happy_path_walks_to_landed() {
        let mut r = record();
        r.advance(BatchState::Dispatching);
        r.advance(BatchState::InFlight);
        r.advance(BatchState::Landed);
        assert_eq!(r.state, BatchState::Landed);
        assert!(r.landed_at.is_some());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut r = record();
        r.advance(BatchState::Dispatching);
        r.advance(BatchState::Failed);
        r.advance(BatchState::InFlight);
        assert_eq!(r.state, BatchState::Failed);
    }

    #[test]
    fn planned_cannot_jump_to_landed() {
        let mut r = record();
        r.advance(BatchState::Landed);
        assert_eq!(r.state, BatchState::Planned);
        assert!(r.landed_at.is_none());
    }
}
