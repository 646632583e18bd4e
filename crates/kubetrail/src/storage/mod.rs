pub mod change;
pub mod layout;
pub mod tree;
pub mod writer;

pub use change::{ChangeOperation, ChangeRecord, SYSTEM_USER};
pub use layout::{LayoutViolation, StorageLayout, ARCHIVE_DIR};
pub use tree::{ensure_directory, move_file, move_tree, TreeMove};
pub use writer::{StorageWriter, WriteOutcome};
