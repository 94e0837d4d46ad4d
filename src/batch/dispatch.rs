//! Batch Dispatcher / Timing Coordinator
//!
//! WEAKEN, GROW and HACK run for different durations but their effects must
//! land in a fixed relative order: HACK first, GROW restores the money next,
//! WEAKEN cancels the accumulated security last. Each job therefore starts
//! with a delay of `(longest duration + its landing offset) - its own
//! duration`, with a small configured stagger between landings to survive
//! scheduler jitter.
//!
//! A partial batch is worse than no batch: if any launch fails, the whole
//! batch aborts with `DispatchFailed` and the caller falls back to prep.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::config::BatcherConfig;
use crate::error::{BatcherError, BatcherResult};
use crate::host::{GameHost, JobHandle, JobSpec, JobStatus};
use crate::ledger::{CapacityClaim, CapacityLedger};
use crate::model::{CostModel, OperationKind, Target};
use crate::planner::Plan;

use super::{BatchRecord, BatchState};

#[derive(Debug)]
struct LaunchedJob {
    handle: JobHandle,
    claim: CapacityClaim,
}

/// A dispatched batch, observed until all jobs report completion.
#[derive(Debug)]
pub struct InFlightBatch {
    pub record: BatchRecord,
    jobs: Vec<LaunchedJob>,
    deadline: Duration,
}

pub struct BatchDispatcher {
    host: Arc<dyn GameHost>,
    model: Arc<dyn CostModel>,
    ledger: Arc<CapacityLedger>,
    spacing: Duration,
    grace: Duration,
}

impl BatchDispatcher {
    pub fn new(
        host: Arc<dyn GameHost>,
        model: Arc<dyn CostModel>,
        ledger: Arc<CapacityLedger>,
        cfg: &BatcherConfig,
    ) -> Self {
        Self {
            host,
            model,
            ledger,
            spacing: Duration::from_millis(cfg.land_spacing_ms),
            grace: Duration::from_millis(cfg.grace_ms),
        }
    }

    /// Reserve capacity for `threads` of `kind` across the pool, largest
    /// free host first. One job per host slice; all claims are rolled back
    /// if the count cannot be covered.
    fn allocate(
        &self,
        kind: OperationKind,
        threads: u32,
    ) -> BatcherResult<Vec<(String, u32, CapacityClaim)>> {
        let cost = self.model.capacity_cost_per_thread(kind);
        let mut remaining = threads;
        let mut slices = Vec::new();

        for (host_id, free) in self.ledger.hosts_by_free() {
            if remaining == 0 {
                break;
            }
            let chunk = ((free / cost).floor() as u32).min(remaining);
            if chunk == 0 {
                continue;
            }
            match self.ledger.claim(&host_id, chunk as f64 * cost) {
                Ok(claim) => {
                    slices.push((host_id, chunk, claim));
                    remaining -= chunk;
                }
                // Lost a race with a concurrent consumer; try the next host.
                Err(_) => continue,
            }
        }

        if remaining > 0 {
            for (_, _, claim) in &slices {
                self.ledger.release(claim);
            }
            return Err(BatcherError::DispatchFailed(format!(
                "pool cannot cover {} {} threads ({} uncovered)",
                threads, kind, remaining
            )));
        }
        Ok(slices)
    }

    /// Launch all slices of one operation kind. On any rejection the claims
    /// of this kind are released and the error surfaces to abort the batch.
    async fn launch(
        &self,
        target_id: &str,
        kind: OperationKind,
        threads: u32,
        start_delay: Duration,
    ) -> BatcherResult<Vec<LaunchedJob>> {
        let slices = self.allocate(kind, threads)?;
        let mut jobs = Vec::with_capacity(slices.len());

        for (host_id, chunk, claim) in slices {
            let spec = JobSpec {
                kind,
                host_id,
                target_id: target_id.to_string(),
                threads: chunk,
                start_delay,
            };
            match self.host.dispatch_job(spec).await {
                Ok(handle) => jobs.push(LaunchedJob { handle, claim }),
                Err(e) => {
                    // Launched slices of this kind keep running; their
                    // claims are returned now and re-synced by the next
                    // capacity refresh.
                    self.ledger.release(&claim);
                    for job in &jobs {
                        self.ledger.release(&job.claim);
                    }
                    return Err(e);
                }
            }
        }
        Ok(jobs)
    }

    /// Launch all three operation kinds with their landing-order delays.
    pub async fn dispatch(
        &self,
        target: &Target,
        plan: &Plan,
        capability: u32,
    ) -> BatcherResult<InFlightBatch> {
        let mut record = BatchRecord::new(&target.id, plan);

        let hack_dur = self.model.duration(OperationKind::Hack, target, capability)?;
        let grow_dur = self.model.duration(OperationKind::Grow, target, capability)?;
        let weaken_dur = self.model.duration(OperationKind::Weaken, target, capability)?;
        let longest = hack_dur.max(grow_dur).max(weaken_dur);

        // Landing instants relative to the batch: hack, then grow, then
        // weaken, each one stagger apart.
        let schedule = [
            (OperationKind::Weaken, plan.threads.weaken, weaken_dur, 2),
            (OperationKind::Grow, plan.threads.grow, grow_dur, 1),
            (OperationKind::Hack, plan.threads.hack, hack_dur, 0),
        ];

        record.advance(BatchState::Dispatching);
        let mut jobs: Vec<LaunchedJob> = Vec::new();

        // Weaken launches first: an orphaned weaken is the only harmless
        // leftover if a later launch is rejected.
        for (kind, threads, duration, order) in schedule {
            if threads == 0 {
                continue;
            }
            let delay = longest + self.spacing * order - duration;
            match self.launch(&target.id, kind, threads, delay).await {
                Ok(mut launched) => jobs.append(&mut launched),
                Err(e) => {
                    for job in &jobs {
                        self.ledger.release(&job.claim);
                    }
                    record.advance(BatchState::Failed);
                    warn!(batch = %record.id, kind = %kind, "batch aborted during dispatch: {}", e);
                    return Err(e);
                }
            }
        }

        record.advance(BatchState::InFlight);
        debug!(batch = %record.id, jobs = jobs.len(), "batch in flight");
        Ok(InFlightBatch {
            record,
            jobs,
            deadline: longest + self.spacing * 2 + self.grace,
        })
    }

    /// Suspend until every job in the batch lands, or the grace window
    /// expires. Claims are returned to the pool either way.
    pub async fn await_landing(&self, mut batch: InFlightBatch) -> BatcherResult<BatchRecord> {
        let waits = batch.jobs.iter().map(|job| self.host.await_job(&job.handle));
        let outcome = tokio::time::timeout(batch.deadline, join_all(waits)).await;

        for job in &batch.jobs {
            self.ledger.release(&job.claim);
        }

        let results = match outcome {
            Ok(results) => results,
            Err(_) => {
                batch.record.advance(BatchState::Failed);
                return Err(BatcherError::BatchTimeout(batch.record.id));
            }
        };

        for result in results {
            match result {
                Ok(JobStatus::Done) => {}
                Ok(status) => {
                    batch.record.advance(BatchState::Failed);
                    return Err(BatcherError::DispatchFailed(format!(
                        "job landed as {:?}",
                        status
                    )));
                }
                Err(e) => {
                    batch.record.advance(BatchState::Failed);
                    return Err(BatcherError::DispatchFailed(e.to_string()));
                }
            }
        }

        batch.record.advance(BatchState::Landed);
        Ok(batch.record)
    }

    /// One-shot single-kind dispatch, used by the prep loop. No landing
    /// choreography; the job starts immediately.
    pub async fn run_single(
        &self,
        target: &Target,
        kind: OperationKind,
        threads: u32,
        capability: u32,
    ) -> BatcherResult<()> {
        let duration = self.model.duration(kind, target, capability)?;
        let jobs = self.launch(&target.id, kind, threads, Duration::ZERO).await?;

        let waits = jobs.iter().map(|job| self.host.await_job(&job.handle));
        let outcome = tokio::time::timeout(duration + self.grace, join_all(waits)).await;

        for job in &jobs {
            self.ledger.release(&job.claim);
        }

        match outcome {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(JobStatus::Done) => {}
                        Ok(status) => {
                            return Err(BatcherError::DispatchFailed(format!(
                                "{} prep job landed as {:?}",
                                kind, status
                            )))
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            }
            Err(_) => Err(BatcherError::DispatchFailed(format!(
                "{} prep job overran its grace window",
                kind
            ))),
        }
    }
}
