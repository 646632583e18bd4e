//! Ordered processing of admission events.

pub mod context;
pub mod processor;
pub mod queue;
pub mod state;

pub use context::AuditContext;
pub use processor::{EventOutcome, EventProcessor};
pub use queue::{EventQueue, QueueError, NOT_READY_BACKOFF};
pub use state::{ProcessorState, ProcessorStatus};
