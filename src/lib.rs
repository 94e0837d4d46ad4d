//! HGW Proto-Batcher
//!
//! A batching scheduler for hack/grow/weaken automation with:
//! - Pluggable cost model for the host environment's opaque formulas
//! - Integer thread planning with safe-by-excess rounding
//! - Capacity fitting via monotone fraction descent
//! - Timed batch dispatch so effects land in order despite uneven durations
//! - Prep loop as the universal safe recovery state

pub mod batch;
pub mod config;
pub mod error;
#[macro_use]
pub mod event_bus;
pub mod host;
pub mod ledger;
pub mod model;
pub mod planner;

// Re-exports for convenience
pub use batch::{BatchController, BatchDispatcher, BatchRecord, BatchState, PrepLoop};
pub use config::{BatcherConfig, CostConfig};
pub use error::{BatcherError, BatcherResult};
pub use event_bus::{BatcherEvent, EventBus, BATCHER_EVENT_BUS};
pub use host::{GameHost, SimHost};
pub use ledger::CapacityLedger;
pub use model::{CostModel, OperationKind, StandardCostModel, Target};
pub use planner::{CapacityFitter, Plan, RawThreads, ThreadPlanner};
