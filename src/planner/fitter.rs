//! Capacity Fitter
//!
//! Packs a planned batch into the pool's free capacity. Steal at most the
//! configured maximum fraction, but step the fraction down a discrete
//! ladder until the three operations fit. The descent is monotone (a lower
//! fraction never needs more capacity), so it terminates.
//!
//! Fitting is checked against the per-host free list, not the aggregate:
//! whole threads only run on single hosts, so a fragmented pool can hold
//! enough total units and still place nothing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::BatcherConfig;
use crate::error::{BatcherError, BatcherResult};
use crate::model::{CostModel, OperationKind, Target};
use crate::planner::{RawThreads, ThreadPlanner};

/// A fitted plan for one cycle. Created fresh each cycle, discarded after
/// dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub extraction_fraction: f64,
    pub threads: RawThreads,
    pub capacity_required: f64,
    pub fits: bool,
}

pub struct CapacityFitter {
    model: Arc<dyn CostModel>,
    max_fraction: f64,
    fraction_step: f64,
}

impl CapacityFitter {
    pub fn new(model: Arc<dyn CostModel>, cfg: &BatcherConfig) -> Self {
        Self {
            model,
            max_fraction: cfg.max_fraction,
            fraction_step: cfg.fraction_step,
        }
    }

    /// Capacity units the raw counts would occupy.
    pub fn capacity_required(&self, threads: &RawThreads) -> f64 {
        threads.weaken as f64 * self.model.capacity_cost_per_thread(OperationKind::Weaken)
            + threads.grow as f64 * self.model.capacity_cost_per_thread(OperationKind::Grow)
            + threads.hack as f64 * self.model.capacity_cost_per_thread(OperationKind::Hack)
    }

    /// Find the largest ladder fraction (at most `fraction_cap`) whose plan
    /// packs onto the pool, given the free units per worker host.
    pub fn fit(
        &self,
        planner: &ThreadPlanner,
        target: &Target,
        pool_free: &[f64],
        fraction_cap: Option<f64>,
    ) -> BatcherResult<Plan> {
        let ceiling = fraction_cap
            .unwrap_or(self.max_fraction)
            .min(self.max_fraction);
        let budget: f64 = pool_free.iter().sum();

        let mut fraction = ceiling;
        while fraction > 0.0 {
            let threads = planner.plan_threads(target, fraction);
            if threads.is_prep_only() {
                // Below one hack thread's worth; nothing viable further down.
                break;
            }

            let required = self.capacity_required(&threads);
            if required <= budget && self.packs(&threads, pool_free) {
                return Ok(Plan {
                    extraction_fraction: fraction,
                    threads,
                    capacity_required: required,
                    fits: true,
                });
            }
            fraction -= self.fraction_step;
        }

        Err(BatcherError::PlanUnfittable { ceiling })
    }

    /// Dry-run the dispatcher's greedy largest-first placement. A plan that
    /// fails here would pass an aggregate check and still be rejected at
    /// dispatch on every host.
    fn packs(&self, threads: &RawThreads, pool_free: &[f64]) -> bool {
        let mut free = pool_free.to_vec();
        for kind in OperationKind::ALL {
            let mut remaining = match kind {
                OperationKind::Weaken => threads.weaken,
                OperationKind::Grow => threads.grow,
                OperationKind::Hack => threads.hack,
            };
            if remaining == 0 {
                continue;
            }
            let cost = self.model.capacity_cost_per_thread(kind);
            free.sort_by(|a, b| b.total_cmp(a));
            for slot in free.iter_mut() {
                if remaining == 0 {
                    break;
                }
                let chunk = ((*slot / cost).floor() as u32).min(remaining);
                *slot -= chunk as f64 * cost;
                remaining -= chunk;
            }
            if remaining > 0 {
                return false;
            }
        }
        true
    }
}
