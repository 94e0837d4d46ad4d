//! Model Module
//!
//! Core vocabulary of the scheduler: the three operation kinds and the
//! target snapshot they act on.

mod cost;

pub use cost::{CostModel, StandardCostModel};

use serde::{Deserialize, Serialize};

/// The three operation kinds. A closed set; nothing else exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Reduces security by a fixed amount per thread.
    Weaken,
    /// Restores money multiplicatively per thread; raises security.
    Grow,
    /// Extracts a fraction of available money per thread; raises security.
    Hack,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::Weaken,
        OperationKind::Grow,
        OperationKind::Hack,
    ];
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Weaken => write!(f, "weaken"),
            OperationKind::Grow => write!(f, "grow"),
            OperationKind::Hack => write!(f, "hack"),
        }
    }
}

/// One consistent snapshot of a target, as of a single point in time.
///
/// Read fresh every planning cycle; never cached across cycles, because
/// other actors mutate the target concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub money_available: f64,
    pub money_max: f64,
    pub security_current: f64,
    pub security_min: f64,
    pub required_capability: u32,
}

impl Target {
    /// Security above the floor.
    pub fn security_gap(&self) -> f64 {
        (self.security_current - self.security_min).max(0.0)
    }

    /// Whether the target sits at the canonical prepped state, within the
    /// given tolerances (absolute security slack, fraction of max money).
    pub fn is_prepped(&self, security_tolerance: f64, money_tolerance: f64) -> bool {
        self.security_gap() <= security_tolerance
            && self.money_available >= self.money_max * money_tolerance
    }

    /// Multiplicative growth needed to bring money back to maximum.
    pub fn growth_factor_needed(&self) -> f64 {
        if self.money_available <= 0.0 {
            // A fully drained target needs the full climb; callers treat the
            // floor as one unit of money.
            return self.money_max.max(1.0);
        }
        (self.money_max / self.money_available).max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target {
            id: "n00dles".into(),
            money_available: 1_000_000.0,
            money_max: 1_000_000.0,
            security_current: 1.0,
            security_min: 1.0,
            required_capability: 1,
        }
    }

    #[test]
    fn prepped_detection_respects_tolerances() {
        let mut t = target();
        assert!(t.is_prepped(0.01, 0.999));

        t.security_current = 1.5;
        assert!(!t.is_prepped(0.01, 0.999));

        t.security_current = 1.0;
        t.money_available = 900_000.0;
        assert!(!t.is_prepped(0.01, 0.999));
    }

    #[test]
    fn growth_factor_floors_at_one() {
        let t = target();
        assert_eq!(t.growth_factor_needed(), 1.0);

        let mut half = target();
        half.money_available = 500_000.0;
        assert!((half.growth_factor_needed() - 2.0).abs() < 1e-9);
    }
}
