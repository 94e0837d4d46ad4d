//! Simulation Host
//!
//! In-memory stand-in for the game runtime. Owns target and worker state,
//! applies operation effects at their landing instants via spawned tasks,
//! and enforces the capacity check on dispatch. Supports fault injection so
//! tests can exercise the abort/re-prep paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Mutex, Notify};
use tracing::debug;
use uuid::Uuid;

use crate::error::{BatcherError, BatcherResult};
use crate::host::{GameHost, JobHandle, JobSpec, JobStatus};
use crate::model::{CostModel, OperationKind, StandardCostModel, Target};

#[derive(Debug, Clone)]
struct WorkerNode {
    total: f64,
    used: f64,
}

#[derive(Debug, Default)]
struct SimStats {
    dispatches: HashMap<OperationKind, u64>,
    completions: u64,
    total_stolen: f64,
}

#[derive(Default)]
struct SimState {
    targets: HashMap<String, Target>,
    workers: HashMap<String, WorkerNode>,
    jobs: HashMap<Uuid, JobStatus>,
    /// Kinds whose next dispatch is rejected outright.
    dispatch_faults: Vec<OperationKind>,
    /// Kinds whose next job runs to completion but reports failure and
    /// applies no effect.
    job_faults: Vec<OperationKind>,
    /// Kinds whose next job hangs far past any grace window.
    stall_faults: Vec<OperationKind>,
    stats: SimStats,
}

/// Simulated game runtime backing a pool of worker hosts and targets.
#[derive(Clone)]
pub struct SimHost {
    model: Arc<StandardCostModel>,
    capability: u32,
    inner: Arc<Mutex<SimState>>,
    /// Pinged whenever any job finishes, so waiters wake without polling.
    completion: Arc<Notify>,
}

impl SimHost {
    pub fn new(model: Arc<StandardCostModel>, capability: u32) -> Self {
        Self {
            model,
            capability,
            inner: Arc::new(Mutex::new(SimState::default())),
            completion: Arc::new(Notify::new()),
        }
    }

    pub async fn add_target(&self, target: Target) {
        let mut state = self.inner.lock().await;
        state.targets.insert(target.id.clone(), target);
    }

    pub async fn add_worker(&self, host_id: impl Into<String>, capacity: f64) {
        let mut state = self.inner.lock().await;
        state.workers.insert(
            host_id.into(),
            WorkerNode {
                total: capacity,
                used: 0.0,
            },
        );
    }

    /// Reject the next dispatch of `kind` as if capacity vanished.
    pub async fn inject_dispatch_failure(&self, kind: OperationKind) {
        self.inner.lock().await.dispatch_faults.push(kind);
    }

    /// Make the next job of `kind` land as FAILED with no effect applied.
    pub async fn inject_job_failure(&self, kind: OperationKind) {
        self.inner.lock().await.job_faults.push(kind);
    }

    /// Make the next job of `kind` stall well past any grace window while
    /// still holding its capacity.
    pub async fn inject_job_stall(&self, kind: OperationKind) {
        self.inner.lock().await.stall_faults.push(kind);
    }

    pub async fn dispatch_count(&self, kind: OperationKind) -> u64 {
        *self
            .inner
            .lock()
            .await
            .stats
            .dispatches
            .get(&kind)
            .unwrap_or(&0)
    }

    pub async fn completions(&self) -> u64 {
        self.inner.lock().await.stats.completions
    }

    pub async fn total_stolen(&self) -> f64 {
        self.inner.lock().await.stats.total_stolen
    }

    pub async fn target_state(&self, id: &str) -> Option<Target> {
        self.inner.lock().await.targets.get(id).cloned()
    }

    fn apply_effect(model: &StandardCostModel, target: &mut Target, kind: OperationKind, threads: u32) -> f64 {
        let n = threads as f64;
        match kind {
            OperationKind::Weaken => {
                let drop = n * model.weaken_drop_per_thread();
                target.security_current = (target.security_current - drop).max(target.security_min);
                0.0
            }
            OperationKind::Grow => {
                let rate = model.grow_rate_per_thread(target);
                let factor = (1.0 + rate).powi(threads as i32);
                target.money_available = (target.money_available * factor).min(target.money_max);
                target.security_current += n * model.security_gain_per_thread(kind);
                0.0
            }
            OperationKind::Hack => {
                let frac = model.hack_fraction_per_thread(target);
                let stolen = target.money_available * (n * frac).min(1.0);
                target.money_available -= stolen;
                target.security_current += n * model.security_gain_per_thread(kind);
                stolen
            }
        }
    }
}

#[async_trait]
impl GameHost for SimHost {
    async fn query_target(&self, id: &str) -> BatcherResult<Target> {
        let state = self.inner.lock().await;
        state
            .targets
            .get(id)
            .cloned()
            .ok_or_else(|| BatcherError::NotFound(id.to_string()))
    }

    async fn query_capacity(&self, host_id: &str) -> BatcherResult<f64> {
        let state = self.inner.lock().await;
        state
            .workers
            .get(host_id)
            .map(|w| (w.total - w.used).max(0.0))
            .ok_or_else(|| BatcherError::NotFound(host_id.to_string()))
    }

    async fn query_capability(&self) -> BatcherResult<u32> {
        Ok(self.capability)
    }

    async fn dispatch_job(&self, spec: JobSpec) -> BatcherResult<JobHandle> {
        let (job_id, run_for, fail_effect) = {
            let mut state = self.inner.lock().await;

            let target = state
                .targets
                .get(&spec.target_id)
                .cloned()
                .ok_or_else(|| BatcherError::NotFound(spec.target_id.clone()))?;

            if let Some(pos) = state
                .dispatch_faults
                .iter()
                .position(|&k| k == spec.kind)
            {
                state.dispatch_faults.remove(pos);
                return Err(BatcherError::DispatchFailed(format!(
                    "{} launch rejected by host", spec.kind
                )));
            }

            let duration = self.model.duration(spec.kind, &target, self.capability)?;
            let cost = spec.threads as f64 * self.model.capacity_cost_per_thread(spec.kind);

            let worker = state
                .workers
                .get_mut(&spec.host_id)
                .ok_or_else(|| BatcherError::NotFound(spec.host_id.clone()))?;
            if cost > worker.total - worker.used {
                return Err(BatcherError::DispatchFailed(format!(
                    "{} needs {:.2} units on {}, only {:.2} free",
                    spec.kind,
                    cost,
                    spec.host_id,
                    worker.total - worker.used
                )));
            }
            worker.used += cost;

            let job_id = Uuid::new_v4();
            state.jobs.insert(job_id, JobStatus::Running);
            *state.stats.dispatches.entry(spec.kind).or_insert(0) += 1;

            let fail_effect = match state.job_faults.iter().position(|&k| k == spec.kind) {
                Some(pos) => {
                    state.job_faults.remove(pos);
                    true
                }
                None => false,
            };

            let stalled = match state.stall_faults.iter().position(|&k| k == spec.kind) {
                Some(pos) => {
                    state.stall_faults.remove(pos);
                    true
                }
                None => false,
            };

            // Scheduler jitter: landings never hit their instant exactly.
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..5));
            let mut run_for = spec.start_delay + duration + jitter;
            if stalled {
                run_for += Duration::from_secs(3_600);
            }
            (job_id, run_for, fail_effect)
        };

        let inner = self.inner.clone();
        let model = self.model.clone();
        let completion = self.completion.clone();
        let spec_clone = spec.clone();
        tokio::spawn(async move {
            tokio::time::sleep(run_for).await;
            let mut state = inner.lock().await;

            let stolen = if fail_effect {
                0.0
            } else if let Some(target) = state.targets.get_mut(&spec_clone.target_id) {
                Self::apply_effect(&model, target, spec_clone.kind, spec_clone.threads)
            } else {
                0.0
            };
            state.stats.total_stolen += stolen;

            let cost =
                spec_clone.threads as f64 * model.capacity_cost_per_thread(spec_clone.kind);
            if let Some(worker) = state.workers.get_mut(&spec_clone.host_id) {
                worker.used = (worker.used - cost).max(0.0);
            }

            let outcome = if fail_effect {
                JobStatus::Failed
            } else {
                JobStatus::Done
            };
            state.jobs.insert(job_id, outcome);
            state.stats.completions += 1;
            debug!(job = %job_id, kind = %spec_clone.kind, ?outcome, "sim job finished");
            drop(state);
            completion.notify_waiters();
        });

        Ok(JobHandle {
            id: job_id,
            kind: spec.kind,
            host_id: spec.host_id,
        })
    }

    async fn job_status(&self, handle: &JobHandle) -> BatcherResult<JobStatus> {
        let state = self.inner.lock().await;
        state
            .jobs
            .get(&handle.id)
            .copied()
            .ok_or_else(|| BatcherError::NotFound(handle.id.to_string()))
    }

    /// Suspends on the completion signal instead of polling.
    async fn await_job(&self, handle: &JobHandle) -> BatcherResult<JobStatus> {
        loop {
            let notified = self.completion.notified();
            tokio::pin!(notified);
            // Register before checking so a finish between the check and the
            // await is not missed.
            notified.as_mut().enable();
            match self.job_status(handle).await? {
                JobStatus::Running => notified.await,
                terminal => return Ok(terminal),
            }
        }
    }
}
