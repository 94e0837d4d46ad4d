//! Capacity Ledger
//!
//! Explicit claim/release bookkeeping for the shared capacity pool. One
//! ledger owns the accounting for one pool of hosts; capacity committed to
//! an in-flight batch stays claimed until the corresponding jobs are
//! observed complete. No other planner may touch claimed units.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;
use uuid::Uuid;

use crate::error::{BatcherError, BatcherResult};

/// A successful reservation of capacity units on one host. Returned to the
/// pool through [`CapacityLedger::release`].
#[derive(Debug, Clone)]
pub struct CapacityClaim {
    pub id: Uuid,
    pub host_id: String,
    pub units: f64,
}

#[derive(Debug, Default)]
struct HostBook {
    total: f64,
    claimed: f64,
}

impl HostBook {
    fn free(&self) -> f64 {
        (self.total - self.claimed).max(0.0)
    }
}

/// Single owner of capacity accounting for a pool of hosts.
#[derive(Debug, Default)]
pub struct CapacityLedger {
    inner: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    hosts: HashMap<String, HostBook>,
    outstanding: HashMap<Uuid, (String, f64)>,
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host to the pool with its currently free units.
    pub fn register_host(&self, host_id: impl Into<String>, free_units: f64) {
        let mut state = self.inner.lock().expect("ledger lock");
        state.hosts.insert(
            host_id.into(),
            HostBook {
                total: free_units,
                claimed: 0.0,
            },
        );
    }

    /// Refresh a host from a fresh capacity report. The report already
    /// excludes capacity our own in-flight jobs occupy, so outstanding
    /// claims are added back to keep `free()` equal to the report.
    pub fn refresh_host(&self, host_id: &str, reported_free: f64) -> BatcherResult<()> {
        let mut state = self.inner.lock().expect("ledger lock");
        let book = state
            .hosts
            .get_mut(host_id)
            .ok_or_else(|| BatcherError::NotFound(host_id.to_string()))?;
        book.total = reported_free + book.claimed;
        Ok(())
    }

    /// Free units on one host.
    pub fn free_on(&self, host_id: &str) -> BatcherResult<f64> {
        let state = self.inner.lock().expect("ledger lock");
        state
            .hosts
            .get(host_id)
            .map(|b| b.free())
            .ok_or_else(|| BatcherError::NotFound(host_id.to_string()))
    }

    /// Free units across the whole pool.
    pub fn total_free(&self) -> f64 {
        let state = self.inner.lock().expect("ledger lock");
        state.hosts.values().map(|b| b.free()).sum()
    }

    /// Hosts ordered by free capacity, largest first. Snapshot; callers
    /// re-validate through `claim`.
    pub fn hosts_by_free(&self) -> Vec<(String, f64)> {
        let state = self.inner.lock().expect("ledger lock");
        let mut hosts: Vec<(String, f64)> = state
            .hosts
            .iter()
            .map(|(id, b)| (id.clone(), b.free()))
            .collect();
        hosts.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hosts
    }

    /// Reserve `units` on `host_id`, or fail without side effects.
    pub fn claim(&self, host_id: &str, units: f64) -> BatcherResult<CapacityClaim> {
        let mut state = self.inner.lock().expect("ledger lock");
        let book = state
            .hosts
            .get_mut(host_id)
            .ok_or_else(|| BatcherError::NotFound(host_id.to_string()))?;
        if units > book.free() {
            return Err(BatcherError::DispatchFailed(format!(
                "claim of {:.2} units on {} exceeds free {:.2}",
                units,
                host_id,
                book.free()
            )));
        }
        book.claimed += units;
        let claim = CapacityClaim {
            id: Uuid::new_v4(),
            host_id: host_id.to_string(),
            units,
        };
        state
            .outstanding
            .insert(claim.id, (claim.host_id.clone(), units));
        Ok(claim)
    }

    /// Return a claim to the pool. Releasing twice is a logged no-op.
    pub fn release(&self, claim: &CapacityClaim) {
        let mut state = self.inner.lock().expect("ledger lock");
        let Some((host_id, units)) = state.outstanding.remove(&claim.id) else {
            warn!(claim = %claim.id, "release of unknown or already-released claim");
            return;
        };
        if let Some(book) = state.hosts.get_mut(&host_id) {
            book.claimed = (book.claimed - units).max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_release_round_trip() {
        let ledger = CapacityLedger::new();
        ledger.register_host("home", 100.0);

        let claim = ledger.claim("home", 60.0).expect("claim fits");
        assert!((ledger.free_on("home").unwrap() - 40.0).abs() < 1e-9);

        ledger.release(&claim);
        assert!((ledger.free_on("home").unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn overcommit_is_rejected() {
        let ledger = CapacityLedger::new();
        ledger.register_host("home", 100.0);

        let _held = ledger.claim("home", 90.0).expect("first claim fits");
        let err = ledger.claim("home", 20.0).unwrap_err();
        assert!(matches!(err, BatcherError::DispatchFailed(_)));
        // The failed claim must not have consumed anything.
        assert!((ledger.free_on("home").unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn refresh_preserves_outstanding_claims() {
        let ledger = CapacityLedger::new();
        ledger.register_host("home", 100.0);
        let claim = ledger.claim("home", 30.0).expect("claim fits");

        // Host now reports 50 free (our 30 are running there, plus some
        // third-party consumer took 20).
        ledger.refresh_host("home", 50.0).unwrap();
        assert!((ledger.free_on("home").unwrap() - 50.0).abs() < 1e-9);

        ledger.release(&claim);
        assert!((ledger.free_on("home").unwrap() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn double_release_is_a_no_op() {
        let ledger = CapacityLedger::new();
        ledger.register_host("home", 100.0);
        let claim = ledger.claim("home", 30.0).expect("claim fits");
        ledger.release(&claim);
        ledger.release(&claim);
        assert!((ledger.free_on("home").unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn pool_orders_hosts_by_free_capacity() {
        let ledger = CapacityLedger::new();
        ledger.register_host("small", 10.0);
        ledger.register_host("big", 200.0);
        ledger.register_host("mid", 50.0);

        let hosts = ledger.hosts_by_free();
        assert_eq!(hosts[0].0, "big");
        assert_eq!(hosts[2].0, "small");
        assert!((ledger.total_free() - 260.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_host_is_not_found() {
        let ledger = CapacityLedger::new();
        assert!(matches!(
            ledger.claim("ghost", 1.0).unwrap_err(),
            BatcherError::NotFound(_)
        ));
    }
}
