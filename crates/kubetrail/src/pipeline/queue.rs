use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};
use thiserror::Error;

use super::processor::EventProcessor;
use super::state::{ProcessorState, ProcessorStatus};
use crate::admission::AuditEvent;

/// Pause between readiness checks while the pipeline is starting.
pub const NOT_READY_BACKOFF: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Event queue is shut down")]
    Closed,
}

/// FIFO intake for admission events, drained by a single consumer thread.
///
/// An event that arrives before the pipeline is ready is held by the
/// consumer, not requeued, so arrival order is preserved.
pub struct EventQueue {
    sender: Sender<AuditEvent>,
    receiver: Receiver<AuditEvent>,
    status: ProcessorStatus,
    shutdown: Arc<AtomicBool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            status: ProcessorStatus::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
            consumer: Mutex::new(None),
        }
    }

    pub fn submit(&self, event: AuditEvent) -> Result<(), QueueError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(QueueError::Closed);
        }
        self.sender.send(event).map_err(|_| QueueError::Closed)
    }

    /// Events waiting, not counting the one being processed.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn state(&self) -> ProcessorState {
        self.status.get()
    }

    /// Starts the consumer thread. Calling it again has no effect.
    pub fn start(&self, processor: EventProcessor) {
        let mut consumer = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
        if consumer.is_some() {
            return;
        }

        let receiver = self.receiver.clone();
        let processor = processor.with_status(self.status.clone());
        let shutdown = Arc::clone(&self.shutdown);
        *consumer = Some(thread::spawn(move || {
            run_consumer(receiver, processor, shutdown);
        }));
        info!("Event consumer started");
    }

    pub fn shutdown(&self) {
        info!("Shutting down event queue...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Waits for the consumer thread to exit. Call after [`shutdown`](Self::shutdown).
    pub fn wait(&self) {
        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.join() {
                error!("Event consumer panicked: {:?}", e);
            }
        }
        let dropped = self.receiver.len();
        if dropped > 0 {
            log::warn!("{} queued events were not processed before shutdown", dropped);
        }
    }
}

fn run_consumer(
    receiver: Receiver<AuditEvent>,
    processor: EventProcessor,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Event consumer running");
    let mut idle = true;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            drain(&receiver, &processor, &shutdown, &mut idle);
            break;
        }

        let event = match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                idle = true;
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if !wait_until_ready(&processor, &shutdown, &event) {
            break;
        }
        handle(&processor, &event, &mut idle);
    }

    debug!("Event consumer stopped");
}

/// Processes what is still queued at shutdown. Every queued event was
/// already acknowledged to the API server.
fn drain(
    receiver: &Receiver<AuditEvent>,
    processor: &EventProcessor,
    shutdown: &AtomicBool,
    idle: &mut bool,
) {
    let pending = receiver.len();
    if pending > 0 {
        info!("Draining {} queued events before shutdown", pending);
    }

    while let Ok(event) = receiver.try_recv() {
        if !wait_until_ready(processor, shutdown, &event) {
            return;
        }
        handle(processor, &event, idle);
    }
}

fn handle(processor: &EventProcessor, event: &AuditEvent, idle: &mut bool) {
    if *idle {
        processor.pull_latest();
        *idle = false;
    }

    if let Err(e) = processor.process(event) {
        debug!("Event {} finished with error: {}", event.uid, e);
    }
}

/// Holds `event` until the pipeline is ready.
///
/// After shutdown it still waits out the initial sync, but gives up if
/// bootstrap never finished. Returns false when the event cannot be written.
fn wait_until_ready(processor: &EventProcessor, shutdown: &AtomicBool, event: &AuditEvent) -> bool {
    let ctx = processor.context();
    let mut logged = false;
    while !(ctx.is_ready() && ctx.is_sync_complete()) {
        if shutdown.load(Ordering::Relaxed) && !ctx.is_ready() {
            log::warn!(
                "Shutdown before the audit tree was ready, dropping event {}",
                event.uid
            );
            return false;
        }
        if !logged {
            info!("Audit pipeline not ready, holding event {}", event.uid);
            logged = true;
        }
        thread::sleep(NOT_READY_BACKOFF);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Operation;
    use crate::cluster::InMemoryCluster;
    use crate::config::{AuditConfig, HelmSettings};
    use crate::helm::{NoProbe, RepositoryLocator};
    use crate::pipeline::AuditContext;
    use serde_json::json;
    use std::time::Instant;
    use tempfile::TempDir;

    fn event(name: &str) -> AuditEvent {
        AuditEvent {
            operation: Operation::Create,
            object: json!({"kind": "ConfigMap", "metadata": {"name": name, "namespace": "ns1"}}),
            user: "alice".to_string(),
            uid: name.to_string(),
        }
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn test_events_held_until_ready_then_processed_in_order() {
        let temp = TempDir::new().unwrap();
        let context = Arc::new(AuditContext::new(
            AuditConfig::new(temp.path()),
            Arc::new(InMemoryCluster::new()),
            RepositoryLocator::new(HelmSettings::default(), Arc::new(NoProbe)),
        ));

        let queue = EventQueue::new();
        queue.start(EventProcessor::new(Arc::clone(&context)));
        queue.submit(event("first")).unwrap();
        queue.submit(event("second")).unwrap();

        thread::sleep(Duration::from_millis(300));
        assert!(!temp.path().join("ns1").exists());

        context.bootstrap().unwrap();
        context.mark_sync_complete();

        assert!(wait_for(|| queue.is_empty() && queue.state() == ProcessorState::Waiting
            && context.writer.read_change("ns1").is_some_and(|c| c.resource_name == "second")));
        assert!(temp.path().join("ns1/standalone-resources/configmap-first.yaml").exists());

        queue.shutdown();
        queue.wait();
        assert!(matches!(queue.submit(event("late")), Err(QueueError::Closed)));
    }

    fn ready_context(temp: &TempDir) -> Arc<AuditContext> {
        let context = Arc::new(AuditContext::new(
            AuditConfig::new(temp.path()),
            Arc::new(InMemoryCluster::new()),
            RepositoryLocator::new(HelmSettings::default(), Arc::new(NoProbe)),
        ));
        context.bootstrap().unwrap();
        context.mark_sync_complete();
        context
    }

    #[test]
    fn test_shutdown_drains_acknowledged_events() {
        let temp = TempDir::new().unwrap();
        let context = ready_context(&temp);

        let queue = EventQueue::new();
        for i in 0..10 {
            queue.submit(event(&format!("cm-{}", i))).unwrap();
        }
        queue.start(EventProcessor::new(Arc::clone(&context)));
        queue.shutdown();
        queue.wait();

        assert!(queue.is_empty());
        for i in 0..10 {
            let file = format!("ns1/standalone-resources/configmap-cm-{}.yaml", i);
            assert!(temp.path().join(&file).exists(), "{} was not written", file);
        }
        assert_eq!(
            context.writer.read_change("ns1").map(|c| c.resource_name),
            Some("cm-9".to_string())
        );
    }

    #[test]
    fn test_shutdown_waits_for_initial_sync_before_draining() {
        let temp = TempDir::new().unwrap();
        let context = Arc::new(AuditContext::new(
            AuditConfig::new(temp.path()),
            Arc::new(InMemoryCluster::new()),
            RepositoryLocator::new(HelmSettings::default(), Arc::new(NoProbe)),
        ));
        context.bootstrap().unwrap();

        let queue = EventQueue::new();
        queue.submit(event("held")).unwrap();
        queue.start(EventProcessor::new(Arc::clone(&context)));
        queue.shutdown();

        let syncing = Arc::clone(&context);
        let sync = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            syncing.mark_sync_complete();
        });
        queue.wait();
        sync.join().unwrap();

        assert!(temp.path().join("ns1/standalone-resources/configmap-held.yaml").exists());
    }

    #[test]
    fn test_shutdown_without_bootstrap_exits() {
        let temp = TempDir::new().unwrap();
        let context = Arc::new(AuditContext::new(
            AuditConfig::new(temp.path()),
            Arc::new(InMemoryCluster::new()),
            RepositoryLocator::new(HelmSettings::default(), Arc::new(NoProbe)),
        ));

        let queue = EventQueue::new();
        queue.submit(event("orphan")).unwrap();
        queue.start(EventProcessor::new(Arc::clone(&context)));
        queue.shutdown();
        queue.wait();

        assert!(!temp.path().join("ns1").exists());
    }
}
