//! Batch Controller
//!
//! The steady-state loop for one target: read state, plan, fit, dispatch,
//! await landing, repeat forever. Errors never terminate the loop (except a
//! vanished target); everything else degrades to the prep loop, the
//! system's universal safe recovery state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::BatcherConfig;
use crate::emit_event;
use crate::error::{BatcherError, BatcherResult};
use crate::event_bus::BatcherEvent;
use crate::host::GameHost;
use crate::ledger::CapacityLedger;
use crate::model::CostModel;
use crate::planner::{CapacityFitter, ThreadPlanner};

use super::{BatchDispatcher, BatchRecord, PrepLoop};

/// What one successful cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub record: BatchRecord,
    pub extracted: f64,
}

pub struct BatchController {
    host: Arc<dyn GameHost>,
    ledger: Arc<CapacityLedger>,
    planner: ThreadPlanner,
    fitter: CapacityFitter,
    dispatcher: Arc<BatchDispatcher>,
    prep: PrepLoop,
    cfg: BatcherConfig,
    fraction_cap: Option<f64>,
}

impl BatchController {
    pub fn new(
        host: Arc<dyn GameHost>,
        model: Arc<dyn CostModel>,
        ledger: Arc<CapacityLedger>,
        cfg: BatcherConfig,
    ) -> Self {
        let dispatcher = Arc::new(BatchDispatcher::new(
            host.clone(),
            model.clone(),
            ledger.clone(),
            &cfg,
        ));
        let prep = PrepLoop::new(
            host.clone(),
            model.clone(),
            ledger.clone(),
            dispatcher.clone(),
            &cfg,
        );
        Self {
            host,
            ledger,
            planner: ThreadPlanner::new(model.clone(), &cfg),
            fitter: CapacityFitter::new(model, &cfg),
            dispatcher,
            prep,
            cfg,
            fraction_cap: None,
        }
    }

    /// Override the extraction-fraction ceiling for this controller.
    pub fn with_fraction_cap(mut self, fraction: f64) -> Self {
        self.fraction_cap = Some(fraction);
        self
    }

    /// Pull fresh capacity reports for every host in the pool.
    async fn refresh_pool(&self) -> BatcherResult<()> {
        for (host_id, _) in self.ledger.hosts_by_free() {
            let free = self.host.query_capacity(&host_id).await?;
            self.ledger.refresh_host(&host_id, free)?;
        }
        Ok(())
    }

    /// One full cycle: prep if needed, plan, fit, dispatch, await landing.
    #[tracing::instrument(skip(self), fields(target = %target_id))]
    pub async fn cycle(&self, target_id: &str, force_prep: bool) -> BatcherResult<CycleOutcome> {
        self.refresh_pool().await?;

        let snapshot = self.host.query_target(target_id).await?;
        let needs_prep = force_prep
            || !snapshot.is_prepped(
                self.cfg.prep_security_tolerance,
                self.cfg.prep_money_tolerance,
            );
        if needs_prep {
            self.prep.prep(target_id).await?;
        }

        // Re-read after prep; planning against a stale snapshot is how
        // drift bugs start.
        let target = self.host.query_target(target_id).await?;
        let capability = self.host.query_capability().await?;

        let pool_free: Vec<f64> = self
            .ledger
            .hosts_by_free()
            .into_iter()
            .map(|(_, free)| free)
            .collect();
        let plan = self
            .fitter
            .fit(&self.planner, &target, &pool_free, self.fraction_cap)?;
        emit_event!(BatcherEvent::PlanFitted {
            target: target_id.to_string(),
            fraction: plan.extraction_fraction,
            weaken: plan.threads.weaken,
            grow: plan.threads.grow,
            hack: plan.threads.hack,
        });
        debug!(
            fraction = plan.extraction_fraction,
            weaken = plan.threads.weaken,
            grow = plan.threads.grow,
            hack = plan.threads.hack,
            capacity = plan.capacity_required,
            "plan fitted"
        );

        let batch = self.dispatcher.dispatch(&target, &plan, capability).await?;
        emit_event!(BatcherEvent::BatchDispatched {
            id: batch.record.id,
            target: target_id.to_string(),
        });

        let record = self.dispatcher.await_landing(batch).await?;

        // The grow threads restore the pool before the next read, so the
        // steal itself is the best available extraction observable.
        let extracted = plan.extraction_fraction * target.money_available;
        emit_event!(BatcherEvent::BatchLanded {
            id: record.id,
            target: target_id.to_string(),
            extracted,
        });

        Ok(CycleOutcome { record, extracted })
    }

    /// Steady-state loop. Returns only when the target becomes unknown to
    /// the collaborator; every other failure is absorbed and recovered.
    pub async fn run(&self, target_id: &str) -> BatcherResult<()> {
        info!(target = %target_id, "steady-state batching started");
        let started = Instant::now();
        let mut total_extracted = 0.0_f64;
        let mut batches_landed: u64 = 0;
        let mut force_prep = false;

        loop {
            match self.cycle(target_id, force_prep).await {
                Ok(outcome) => {
                    force_prep = false;
                    total_extracted += outcome.extracted;
                    batches_landed += 1;
                    let per_minute =
                        total_extracted / (started.elapsed().as_secs_f64() / 60.0).max(1e-9);
                    info!(
                        target = %target_id,
                        batch = %outcome.record.id,
                        extracted = outcome.extracted,
                        batches_landed,
                        rate_per_min = per_minute,
                        "batch landed"
                    );
                }
                Err(e @ BatcherError::NotFound(_)) => {
                    warn!(target = %target_id, "target loop aborted: {}", e);
                    return Err(e);
                }
                Err(e @ BatcherError::CapabilityTooLow { .. }) => {
                    // Raising capability is someone else's job; stall and
                    // retry on a fixed backoff.
                    warn!(target = %target_id, "{}; backing off", e);
                    tokio::time::sleep(Duration::from_millis(self.cfg.capability_backoff_ms))
                        .await;
                }
                Err(e @ BatcherError::PlanUnfittable { .. }) => {
                    debug!(target = %target_id, "{}; waiting for capacity", e);
                    emit_event!(BatcherEvent::CapacityWait {
                        target: target_id.to_string(),
                    });
                    tokio::time::sleep(Duration::from_millis(self.cfg.unfit_retry_ms)).await;
                }
                Err(e) => {
                    // DispatchFailed / BatchTimeout: target state is now
                    // unknown, so the next cycle re-preps before batching.
                    warn!(target = %target_id, "batch failed: {}; re-prepping", e);
                    let id = match &e {
                        BatcherError::BatchTimeout(id) => Some(*id),
                        _ => None,
                    };
                    emit_event!(BatcherEvent::BatchFailed {
                        id,
                        target: target_id.to_string(),
                        reason: e.to_string(),
                    });
                    force_prep = true;
                    tokio::time::sleep(Duration::from_millis(self.cfg.failure_backoff_ms))
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatcherConfig, CostConfig};
    use crate::host::SimHost;
    use crate::model::{OperationKind, StandardCostModel, Target};

    fn fast_cfg() -> BatcherConfig {
        BatcherConfig {
            cost: CostConfig {
                hack_base_ms: 20,
                hack_fraction_per_thread: 0.01,
                grow_rate_per_thread: 0.02,
                ..CostConfig::default()
            },
            land_spacing_ms: 25,
            grace_ms: 500,
            unfit_retry_ms: 10,
            ..BatcherConfig::default()
        }
    }

    fn prepped_target() -> Target {
        Target {
            id: "n00dles".into(),
            money_available: 1_000_000.0,
            money_max: 1_000_000.0,
            security_current: 1.0,
            security_min: 1.0,
            required_capability: 1,
        }
    }

    async fn rig(capacity: f64) -> (SimHost, BatchController) {
        let cfg = fast_cfg();
        let model = Arc::new(StandardCostModel::new(cfg.cost.clone()));
        let sim = SimHost::new(model.clone(), 100);
        sim.add_target(prepped_target()).await;
        sim.add_worker("home", capacity).await;

        let ledger = Arc::new(CapacityLedger::new());
        ledger.register_host("home", capacity);

        let controller = BatchController::new(
            Arc::new(sim.clone()),
            model as Arc<dyn CostModel>,
            ledger,
            cfg,
        );
        (sim, controller)
    }

    #[tokio::test]
    async fn single_cycle_extracts_and_restores() {
        let (sim, controller) = rig(10_000.0).await;

        let outcome = controller
            .cycle("n00dles", false)
            .await
            .expect("cycle lands");
        assert!(outcome.extracted > 0.0);

        let t = sim.target_state("n00dles").await.unwrap();
        assert!(t.is_prepped(0.01, 0.999));
        assert!(sim.total_stolen().await > 0.0);
    }

    #[tokio::test]
    async fn unknown_target_is_fatal() {
        let (_sim, controller) = rig(10_000.0).await;
        let err = controller.run("ghost").await.unwrap_err();
        assert!(matches!(err, BatcherError::NotFound(_)));
    }

    #[tokio::test]
    async fn dispatch_failure_triggers_reprep_next_cycle() {
        let (sim, controller) = rig(10_000.0).await;
        sim.inject_dispatch_failure(OperationKind::Weaken).await;

        let err = controller.cycle("n00dles", false).await.unwrap_err();
        assert!(matches!(err, BatcherError::DispatchFailed(_)));
        assert_eq!(sim.dispatch_count(OperationKind::Hack).await, 0);

        // Forced prep on the recovery cycle is a no-op here (target is
        // still prepped) and the batch goes through.
        let outcome = controller
            .cycle("n00dles", true)
            .await
            .expect("recovery cycle lands");
        assert!(outcome.extracted > 0.0);
    }

    #[tokio::test]
    async fn batch_timeout_triggers_reprep_next_cycle() {
        let (sim, controller) = rig(10_000.0).await;
        sim.inject_job_stall(OperationKind::Hack).await;

        let err = controller.cycle("n00dles", false).await.unwrap_err();
        assert!(matches!(err, BatcherError::BatchTimeout(_)));

        // The stalled job still holds sim capacity, but the pool is large
        // enough for the recovery batch to land around it.
        let outcome = controller
            .cycle("n00dles", true)
            .await
            .expect("recovery cycle lands");
        assert!(outcome.extracted > 0.0);
    }

    #[tokio::test]
    async fn fragmented_pool_waits_instead_of_dispatch_failing() {
        // Five 1.6-unit workers hold 8.0 units in aggregate, but no single
        // worker fits one whole thread. The cycle must report an unfittable
        // plan, not launch anything.
        let cfg = fast_cfg();
        let model = Arc::new(StandardCostModel::new(cfg.cost.clone()));
        let sim = SimHost::new(model.clone(), 100);
        sim.add_target(prepped_target()).await;

        let ledger = Arc::new(CapacityLedger::new());
        for id in ["a", "b", "c", "d", "e"] {
            sim.add_worker(id, 1.6).await;
            ledger.register_host(id, 1.6);
        }

        let controller = BatchController::new(
            Arc::new(sim.clone()),
            model as Arc<dyn CostModel>,
            ledger,
            cfg,
        )
        .with_fraction_cap(0.01);

        let err = controller.cycle("n00dles", false).await.unwrap_err();
        assert!(matches!(err, BatcherError::PlanUnfittable { .. }));
        for kind in OperationKind::ALL {
            assert_eq!(sim.dispatch_count(kind).await, 0);
        }
    }

    #[tokio::test]
    async fn fraction_cap_bounds_the_plan() {
        let (_sim, controller) = rig(10_000.0).await;
        let controller = controller.with_fraction_cap(0.25);

        let outcome = controller
            .cycle("n00dles", false)
            .await
            .expect("cycle lands");
        assert!(outcome.record.extraction_fraction <= 0.25 + 1e-9);
    }
}
