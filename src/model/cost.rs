//! Operation Cost Model
//!
//! Durations and per-thread effect magnitudes come from the host
//! environment's own formulas, which are closed-source game balance. The
//! scheduler therefore talks to a trait and treats it as an opaque,
//! monotonic function of (security, capability). `StandardCostModel` is the
//! configurable stand-in used by the simulation host and the demo pool.

use std::time::Duration;

use crate::config::CostConfig;
use crate::error::{BatcherError, BatcherResult};
use crate::model::{OperationKind, Target};

/// Pluggable cost model seam.
pub trait CostModel: Send + Sync {
    /// How long one operation of `kind` takes against `target` for an agent
    /// at `capability`. Monotonic: rises with security, falls with
    /// capability. Fails if the agent is below the target's requirement.
    fn duration(
        &self,
        kind: OperationKind,
        target: &Target,
        capability: u32,
    ) -> BatcherResult<Duration>;

    /// Fraction of available money one HACK thread steals.
    fn hack_fraction_per_thread(&self, target: &Target) -> f64;

    /// Multiplicative money growth per GROW thread (compounding).
    fn grow_rate_per_thread(&self, target: &Target) -> f64;

    /// Security removed per WEAKEN thread.
    fn weaken_drop_per_thread(&self) -> f64;

    /// Security added per thread of `kind` (zero for WEAKEN).
    fn security_gain_per_thread(&self, kind: OperationKind) -> f64;

    /// Capacity units one thread of `kind` occupies while running.
    fn capacity_cost_per_thread(&self, kind: OperationKind) -> f64;
}

/// Cost model driven entirely by [`CostConfig`] constants.
#[derive(Debug, Clone)]
pub struct StandardCostModel {
    cfg: CostConfig,
}

impl StandardCostModel {
    pub fn new(cfg: CostConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &CostConfig {
        &self.cfg
    }

    fn hack_millis(&self, target: &Target, capability: u32) -> f64 {
        // Harder targets take proportionally longer; stronger agents finish
        // sooner. Both scalings keep the function monotonic.
        let security_scale = 1.0 + self.cfg.duration_security_slope * target.security_gap();
        let capability_scale =
            (target.required_capability as f64 + 100.0) / (capability as f64 + 100.0);
        self.cfg.hack_base_ms as f64 * security_scale * capability_scale
    }
}

impl CostModel for StandardCostModel {
    fn duration(
        &self,
        kind: OperationKind,
        target: &Target,
        capability: u32,
    ) -> BatcherResult<Duration> {
        if capability < target.required_capability {
            return Err(BatcherError::CapabilityTooLow {
                target: target.id.clone(),
                need: target.required_capability,
                have: capability,
            });
        }

        let hack_ms = self.hack_millis(target, capability);
        let ms = match kind {
            OperationKind::Weaken => hack_ms * self.cfg.weaken_duration_ratio,
            OperationKind::Grow => hack_ms * self.cfg.grow_duration_ratio,
            OperationKind::Hack => hack_ms,
        };
        Ok(Duration::from_millis(ms.round() as u64))
    }

    fn hack_fraction_per_thread(&self, _target: &Target) -> f64 {
        self.cfg.hack_fraction_per_thread
    }

    fn grow_rate_per_thread(&self, _target: &Target) -> f64 {
        self.cfg.grow_rate_per_thread
    }

    fn weaken_drop_per_thread(&self) -> f64 {
        self.cfg.weaken_drop_per_thread
    }

    fn security_gain_per_thread(&self, kind: OperationKind) -> f64 {
        match kind {
            OperationKind::Weaken => 0.0,
            OperationKind::Grow => self.cfg.grow_security_gain,
            OperationKind::Hack => self.cfg.hack_security_gain,
        }
    }

    fn capacity_cost_per_thread(&self, kind: OperationKind) -> f64 {
        self.cfg.capacity_cost(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(security: f64, required: u32) -> Target {
        Target {
            id: "n00dles".into(),
            money_available: 1_000_000.0,
            money_max: 1_000_000.0,
            security_current: security,
            security_min: 1.0,
            required_capability: required,
        }
    }

    fn model() -> StandardCostModel {
        StandardCostModel::new(CostConfig::default())
    }

    #[test]
    fn duration_ratios_hold_at_minimum_security() {
        let m = model();
        let t = target(1.0, 1);

        let hack = m.duration(OperationKind::Hack, &t, 100).unwrap();
        let grow = m.duration(OperationKind::Grow, &t, 100).unwrap();
        let weaken = m.duration(OperationKind::Weaken, &t, 100).unwrap();

        let h = hack.as_millis() as f64;
        assert!((weaken.as_millis() as f64 / h - 4.0).abs() < 0.01);
        assert!((grow.as_millis() as f64 / h - 3.2).abs() < 0.01);
    }

    #[test]
    fn duration_rises_with_security() {
        let m = model();
        let calm = m
            .duration(OperationKind::Hack, &target(1.0, 1), 100)
            .unwrap();
        let agitated = m
            .duration(OperationKind::Hack, &target(20.0, 1), 100)
            .unwrap();
        assert!(agitated > calm);
    }

    #[test]
    fn duration_falls_with_capability() {
        let m = model();
        let novice = m
            .duration(OperationKind::Hack, &target(1.0, 1), 10)
            .unwrap();
        let veteran = m
            .duration(OperationKind::Hack, &target(1.0, 1), 500)
            .unwrap();
        assert!(veteran < novice);
    }

    #[test]
    fn capability_below_requirement_is_rejected() {
        let m = model();
        let err = m
            .duration(OperationKind::Hack, &target(1.0, 50), 10)
            .unwrap_err();
        assert!(matches!(
            err,
            BatcherError::CapabilityTooLow { need: 50, have: 10, .. }
        ));
    }

    #[test]
    fn weaken_has_no_security_gain() {
        let m = model();
        assert_eq!(m.security_gain_per_thread(OperationKind::Weaken), 0.0);
        assert!(m.security_gain_per_thread(OperationKind::Grow) > 0.0);
        assert!(m.security_gain_per_thread(OperationKind::Hack) > 0.0);
    }
}
