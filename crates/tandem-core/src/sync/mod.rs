//! Reconciliation engine and its scheduling
//!
//! The [`Reconciler`] converges the local store with the broadcast store.
//! The [`Scheduler`] decides when it runs, and the [`ChangePoller`] picks up
//! peer changes between cycles.

mod ledger;
mod poller;
mod reconciler;
mod scheduler;
mod strategy;

pub use ledger::ConflictLedger;
pub use poller::{ChangePoller, PollReport};
pub use reconciler::{CycleStats, Reconciler};
pub use scheduler::{CycleReport, Scheduler, SchedulerHandle, Trigger};
pub use strategy::resolve;
