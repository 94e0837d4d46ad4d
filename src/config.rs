//! Configuration
//!
//! Every game-balance constant the scheduler leans on lives here rather than
//! in code: the host environment owns the real formulas, so these values are
//! illustrative defaults that an operator can override from a JSON file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::model::OperationKind;

/// Constants feeding the standard cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Security removed per WEAKEN thread.
    pub weaken_drop_per_thread: f64,
    /// Security added per GROW thread.
    pub grow_security_gain: f64,
    /// Security added per HACK thread.
    pub hack_security_gain: f64,
    /// Fraction of available money stolen per HACK thread.
    pub hack_fraction_per_thread: f64,
    /// Multiplicative money growth per GROW thread (0.02 = +2%, compounding).
    pub grow_rate_per_thread: f64,
    /// HACK duration at minimum security, in milliseconds.
    pub hack_base_ms: u64,
    /// WEAKEN duration as a multiple of HACK duration.
    pub weaken_duration_ratio: f64,
    /// GROW duration as a multiple of HACK duration.
    pub grow_duration_ratio: f64,
    /// Fractional duration increase per point of security above minimum.
    pub duration_security_slope: f64,
    /// Capacity units consumed per thread, by operation kind.
    pub weaken_capacity_cost: f64,
    pub grow_capacity_cost: f64,
    pub hack_capacity_cost: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            weaken_drop_per_thread: 0.05,
            grow_security_gain: 0.004,
            hack_security_gain: 0.002,
            hack_fraction_per_thread: 0.002,
            grow_rate_per_thread: 0.02,
            hack_base_ms: 5_000,
            weaken_duration_ratio: 4.0,
            grow_duration_ratio: 3.2,
            duration_security_slope: 0.05,
            weaken_capacity_cost: 1.75,
            grow_capacity_cost: 1.75,
            hack_capacity_cost: 1.7,
        }
    }
}

impl CostConfig {
    pub fn capacity_cost(&self, kind: OperationKind) -> f64 {
        match kind {
            OperationKind::Weaken => self.weaken_capacity_cost,
            OperationKind::Grow => self.grow_capacity_cost,
            OperationKind::Hack => self.hack_capacity_cost,
        }
    }
}

/// Scheduler-wide tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    pub cost: CostConfig,
    /// Ceiling on the extraction fraction (steal at most this much).
    pub max_fraction: f64,
    /// Step size for the fitter's fraction descent ladder.
    pub fraction_step: f64,
    /// Extra GROW threads added on top of the computed count, to tolerate
    /// rounding error in the host's own compounding formula.
    pub grow_buffer_threads: u32,
    /// Spacing between consecutive effect landings within one batch.
    pub land_spacing_ms: u64,
    /// Grace period past the longest planned duration before a batch is
    /// declared timed out.
    pub grace_ms: u64,
    /// Backoff between retries when capability is too low.
    pub capability_backoff_ms: u64,
    /// Wait before re-planning when no plan fits the budget.
    pub unfit_retry_ms: u64,
    /// Pause after a failed or timed-out batch before the recovery cycle.
    pub failure_backoff_ms: u64,
    /// Security slack above minimum still considered "prepped".
    pub prep_security_tolerance: f64,
    /// Money fraction of maximum still considered "prepped".
    pub prep_money_tolerance: f64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            cost: CostConfig::default(),
            max_fraction: 0.9,
            fraction_step: 0.05,
            grow_buffer_threads: 1,
            land_spacing_ms: 50,
            grace_ms: 2_000,
            capability_backoff_ms: 30_000,
            unfit_retry_ms: 5_000,
            failure_backoff_ms: 1_000,
            prep_security_tolerance: 0.01,
            prep_money_tolerance: 0.999,
        }
    }
}

impl BatcherConfig {
    /// Load from a JSON file. Absent fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config {}", path.as_ref().display()))?;
        serde_json::from_str(&raw).context("parsing batcher config")
    }
}
