use std::path::PathBuf;
use std::sync::Arc;

use super::context::AuditContext;
use super::state::{ProcessorState, ProcessorStatus};
use crate::admission::{AuditEvent, Operation};
use crate::error::Result;
use crate::git::CommitOutcome;
use crate::resource::{Classification, ResourceRecord, SkipReason};
use crate::storage::ChangeRecord;

/// What happened to one admission event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Skipped(SkipReason),
    Recorded {
        /// Live path of the resource, relative to the storage root.
        path: PathBuf,
        /// Archive file written for a DELETE.
        archived: Option<PathBuf>,
        /// Whether any file in the tree changed.
        changed: bool,
    },
}

/// Applies admission events to the audit tree, one at a time.
pub struct EventProcessor {
    context: Arc<AuditContext>,
    status: ProcessorStatus,
}

impl EventProcessor {
    pub fn new(context: Arc<AuditContext>) -> Self {
        Self {
            context,
            status: ProcessorStatus::default(),
        }
    }

    /// Reports progress through `status` instead of a private one.
    pub fn with_status(mut self, status: ProcessorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> &ProcessorStatus {
        &self.status
    }

    pub fn context(&self) -> &AuditContext {
        &self.context
    }

    /// Writes the event, then commits and pushes whatever was written, even
    /// when the write failed part way.
    pub fn process(&self, event: &AuditEvent) -> Result<EventOutcome> {
        let span = tracing::info_span!("audit_event", uid = %event.uid, operation = %event.operation);
        let _enter = span.enter();

        let _tree = self.context.lock_tree();
        self.status.set(ProcessorState::Processing);

        let result = self.apply(event);
        if let Err(e) = &result {
            log::error!("Error processing {} event {}: {}", event.operation, event.uid, e);
        }

        if !matches!(result, Ok(EventOutcome::Skipped(_))) {
            self.status.set(ProcessorState::Committing);
            self.flush();
        }
        self.status.set(ProcessorState::Waiting);
        result
    }

    /// Brings the tree up to date with the remote before new writes.
    pub fn pull_latest(&self) {
        let _tree = self.context.lock_tree();
        if let Err(e) = self.context.git.pull_latest() {
            log::warn!("Failed to pull latest changes: {}", e);
        }
    }

    fn flush(&self) {
        match self.context.git.commit_and_push() {
            Ok(CommitOutcome::Committed(hash)) => log::debug!("Event committed as {}", hash),
            Ok(CommitOutcome::NothingToCommit) => {}
            Err(e) => log::error!("Failed to commit changes: {}", e),
        }
    }

    fn apply(&self, event: &AuditEvent) -> Result<EventOutcome> {
        let ctx = &*self.context;

        let record = match ctx.classifier.classify(&event.object) {
            Classification::Keep(record) => record,
            Classification::Skip(reason) => {
                log::info!(
                    "Skipping {} {}: {}",
                    event.operation,
                    describe(&event.object),
                    reason
                );
                return Ok(EventOutcome::Skipped(reason));
            }
        };

        log::info!(
            "Processing {} for {} {} in namespace {}",
            event.operation,
            record.kind,
            record.name,
            record.namespace
        );

        let mut changed = false;
        let mut archived = None;

        match event.operation {
            Operation::Delete => {
                let result = ctx
                    .archive
                    .archive_resource(&event.object, &record, &event.user)?;
                log::info!("Archived deleted {}: {}", record.kind, result.path.display());
                archived = Some(result.path);
                changed = true;
            }
            Operation::Create | Operation::Update => {
                changed |= self.refresh_release(&record);
                changed |= ctx.writer.write_resource(&record, &event.object)?.changed();
            }
        }

        let change = ChangeRecord::new(
            event.operation.change_operation(),
            &event.user,
            &record.kind,
            &record.name,
            &record.namespace,
            record.release.as_deref(),
        );
        ctx.writer.record_change(&change, changed)?;

        Ok(EventOutcome::Recorded {
            path: record.path,
            archived,
            changed,
        })
    }

    /// Rewrites the release's values and deployment info. Failures are logged.
    fn refresh_release(&self, record: &ResourceRecord) -> bool {
        let ctx = &*self.context;
        let Some(release) = record.release.as_deref() else {
            return false;
        };
        if !ctx.config.helm_tracking {
            return false;
        }

        match ctx.helm.process_release(&record.namespace, release) {
            Ok(changed) => changed,
            Err(e) => {
                log::warn!(
                    "Failed to process Helm release {} for {} {} in {}: {}",
                    release,
                    record.kind,
                    record.name,
                    record.namespace,
                    e
                );
                false
            }
        }
    }
}

fn describe(obj: &serde_json::Value) -> String {
    let meta = crate::resource::ObjectMeta::of(obj);
    format!(
        "{} {}/{}",
        meta.kind(),
        meta.effective_namespace(),
        meta.name().unwrap_or("<unnamed>")
    )
}
