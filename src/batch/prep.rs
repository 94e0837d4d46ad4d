//! Prep Loop
//!
//! Drives a target from an arbitrary state to the canonical prepped state
//! (minimum security, maximum money) with single-kind one-shots: weaken the
//! gap away first, then grow the money back. Never hacks. There is no
//! fraction fallback here; when capacity is short the loop dispatches what
//! fits and iterates, since an incomplete weaken is just a smaller weaken.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::BatcherConfig;
use crate::emit_event;
use crate::error::BatcherResult;
use crate::event_bus::BatcherEvent;
use crate::host::GameHost;
use crate::ledger::CapacityLedger;
use crate::model::{CostModel, OperationKind, Target};

use super::BatchDispatcher;

pub struct PrepLoop {
    host: Arc<dyn GameHost>,
    model: Arc<dyn CostModel>,
    ledger: Arc<CapacityLedger>,
    dispatcher: Arc<BatchDispatcher>,
    security_tolerance: f64,
    money_tolerance: f64,
    grow_buffer: u32,
    capacity_wait: Duration,
}

impl PrepLoop {
    pub fn new(
        host: Arc<dyn GameHost>,
        model: Arc<dyn CostModel>,
        ledger: Arc<CapacityLedger>,
        dispatcher: Arc<BatchDispatcher>,
        cfg: &BatcherConfig,
    ) -> Self {
        Self {
            host,
            model,
            ledger,
            dispatcher,
            security_tolerance: cfg.prep_security_tolerance,
            money_tolerance: cfg.prep_money_tolerance,
            grow_buffer: cfg.grow_buffer_threads,
            capacity_wait: Duration::from_millis(cfg.unfit_retry_ms),
        }
    }

    fn one_shot(&self, target: &Target) -> (OperationKind, u32) {
        if target.security_gap() > self.security_tolerance {
            let needed =
                (target.security_gap() / self.model.weaken_drop_per_thread()).ceil() as u32;
            (OperationKind::Weaken, needed)
        } else {
            let rate = self.model.grow_rate_per_thread(target);
            let needed = (target.growth_factor_needed().ln() / (1.0 + rate).ln()).ceil() as u32
                + self.grow_buffer;
            (OperationKind::Grow, needed)
        }
    }

    /// Run until the target is prepped. Returns the number of one-shot
    /// cycles it took; an already-prepped target takes zero and issues no
    /// operations at all.
    pub async fn prep(&self, target_id: &str) -> BatcherResult<u32> {
        let mut cycles: u32 = 0;

        loop {
            let target = self.host.query_target(target_id).await?;
            if target.is_prepped(self.security_tolerance, self.money_tolerance) {
                if cycles > 0 {
                    info!(target = %target_id, cycles, "target prepped");
                    emit_event!(BatcherEvent::PrepCompleted {
                        target: target_id.to_string(),
                        cycles,
                    });
                }
                return Ok(cycles);
            }

            if cycles == 0 {
                emit_event!(BatcherEvent::PrepStarted {
                    target: target_id.to_string(),
                });
            }

            let capability = self.host.query_capability().await?;
            let (kind, needed) = self.one_shot(&target);

            // Cap to what the pool can actually run right now; partial
            // progress beats waiting for a full-size shot.
            let cost = self.model.capacity_cost_per_thread(kind);
            let affordable = (self.ledger.total_free() / cost).floor() as u32;
            let threads = needed.min(affordable);
            if threads == 0 {
                emit_event!(BatcherEvent::CapacityWait {
                    target: target_id.to_string(),
                });
                tokio::time::sleep(self.capacity_wait).await;
                continue;
            }

            debug!(target = %target_id, %kind, threads, needed, "prep one-shot");
            self.dispatcher
                .run_single(&target, kind, threads, capability)
                .await?;
            cycles += 1;
        }
    }
}
