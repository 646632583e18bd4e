pub mod admission;
pub mod archive;
pub mod cluster;
pub mod config;
pub mod error;
pub mod git;
pub mod helm;
pub mod pipeline;
pub mod resource;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod sync;

pub use admission::{AdmissionResponseReview, AdmissionReview, AuditEvent, Operation};
pub use archive::{ArchiveManager, ArchiveReport};
pub use cluster::{ClusterClient, ClusterError, InMemoryCluster, KubeClusterClient};
pub use config::{AuditConfig, GitSettings};
pub use error::{AuditError, ConfigError, ErrorPolicy, Result, StorageError};
pub use git::{GitError, GitStore};
pub use pipeline::{AuditContext, EventOutcome, EventProcessor, EventQueue, ProcessorState};
pub use secrets::{resolve_secret, SecretError};
pub use storage::{ChangeOperation, ChangeRecord, StorageLayout, StorageWriter};
pub use sync::{AuditScheduler, Reconciler};
