use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Where the event consumer is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ProcessorState {
    /// Queue empty.
    Waiting = 0,
    /// Writing an event to the tree.
    Processing = 1,
    /// Committing and pushing after an event.
    Committing = 2,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessorState::Waiting => "WAITING",
            ProcessorState::Processing => "PROCESSING",
            ProcessorState::Committing => "COMMITTING",
        })
    }
}

/// Shared, lock-free view of a [`ProcessorState`].
#[derive(Debug, Clone, Default)]
pub struct ProcessorStatus(Arc<AtomicU8>);

impl ProcessorStatus {
    pub fn get(&self) -> ProcessorState {
        match self.0.load(Ordering::SeqCst) {
            1 => ProcessorState::Processing,
            2 => ProcessorState::Committing,
            _ => ProcessorState::Waiting,
        }
    }

    pub fn set(&self, state: ProcessorState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}
