//! Thread Planner
//!
//! Turns a desired extraction fraction into raw, capacity-unconstrained
//! integer thread counts for one batch. All roundings go up: an oversized
//! batch wastes idle capacity for one cycle, an undersized one lets
//! security ratchet upward across cycles, which is unrecoverable without a
//! re-prep.

mod fitter;

pub use fitter::{CapacityFitter, Plan};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::BatcherConfig;
use crate::model::{CostModel, OperationKind, Target};

/// Raw thread counts before capacity fitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawThreads {
    pub weaken: u32,
    pub grow: u32,
    pub hack: u32,
}

impl RawThreads {
    /// A fraction that rounds to zero hack threads means the target should
    /// go through the prep loop this cycle instead of batching.
    pub fn is_prep_only(&self) -> bool {
        self.hack == 0
    }

    pub fn total(&self) -> u32 {
        self.weaken + self.grow + self.hack
    }
}

pub struct ThreadPlanner {
    model: Arc<dyn CostModel>,
    grow_buffer: u32,
}

impl ThreadPlanner {
    pub fn new(model: Arc<dyn CostModel>, cfg: &BatcherConfig) -> Self {
        Self {
            model,
            grow_buffer: cfg.grow_buffer_threads,
        }
    }

    /// Plan one batch at `fraction` against the target's current state.
    pub fn plan_threads(&self, target: &Target, fraction: f64) -> RawThreads {
        let hack_per_thread = self.model.hack_fraction_per_thread(target);
        if hack_per_thread <= 0.0 || fraction <= 0.0 || target.money_max <= 0.0 {
            return RawThreads::default();
        }

        // A target below max money cannot be hacked for the nominal
        // fraction; reduce it so stolen money never exceeds what is there.
        let available_fraction = (target.money_available / target.money_max).clamp(0.0, 1.0);
        let effective_fraction = fraction.min(available_fraction);

        let hack = (effective_fraction / hack_per_thread).ceil() as u32;
        if hack == 0 {
            return RawThreads::default();
        }

        // Grow must out-pace what the hack threads actually steal, which
        // after the ceiling can exceed the nominal fraction.
        let stolen_fraction = (hack as f64 * hack_per_thread).min(0.99);
        let growth_needed = 1.0 / (1.0 - stolen_fraction);
        let grow_rate = self.model.grow_rate_per_thread(target);
        let grow =
            (growth_needed.ln() / (1.0 + grow_rate).ln()).ceil() as u32 + self.grow_buffer;

        // Weaken must cancel every point of security the hack and grow
        // threads add in the same cycle. Never less.
        let security_raised = hack as f64
            * self.model.security_gain_per_thread(OperationKind::Hack)
            + grow as f64 * self.model.security_gain_per_thread(OperationKind::Grow);
        let weaken = (security_raised / self.model.weaken_drop_per_thread()).ceil() as u32;

        RawThreads { weaken, grow, hack }
    }
}
