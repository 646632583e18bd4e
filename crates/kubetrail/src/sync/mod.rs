//! Reconciliation of the stored tree with the live cluster.

pub mod reconciler;
pub mod scheduler;

pub use reconciler::{Reconciler, SyncReport};
pub use scheduler::AuditScheduler;
