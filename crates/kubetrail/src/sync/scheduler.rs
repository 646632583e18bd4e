//! Startup sync and periodic reconciliation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::reconciler::Reconciler;
use crate::pipeline::AuditContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Cleanup,
    FullSync,
    Manual,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Cleanup => write!(f, "cleanup"),
            Pass::FullSync => write!(f, "full sync"),
            Pass::Manual => write!(f, "manual cleanup"),
        }
    }
}

/// Marks the initial sync complete when dropped, so a failing or
/// panicking sync never keeps the event queue closed.
struct SyncCompletion(Arc<AuditContext>);

impl Drop for SyncCompletion {
    fn drop(&mut self) {
        self.0.mark_sync_complete();
        log::info!("Initial sync marked complete");
    }
}

/// Runs the initial sync once, then cleanup passes on a timer.
pub struct AuditScheduler {
    context: Arc<AuditContext>,
    reconciler: Arc<Reconciler>,
    cleanup_interval: Duration,
    sync_interval: Option<Duration>,
    shutdown: Arc<AtomicBool>,
    pass_lock: Arc<Mutex<()>>,
    trigger: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AuditScheduler {
    pub fn new(context: Arc<AuditContext>) -> Self {
        let cleanup = context.config.schedule.cleanup_interval();
        let sync = context.config.schedule.sync_interval();
        Self::with_intervals(context, cleanup, sync)
    }

    pub fn with_intervals(
        context: Arc<AuditContext>,
        cleanup_interval: Duration,
        sync_interval: Option<Duration>,
    ) -> Self {
        let (trigger, _) = broadcast::channel(16);
        Self {
            reconciler: Arc::new(Reconciler::new(Arc::clone(&context))),
            context,
            cleanup_interval,
            sync_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            pass_lock: Arc::new(Mutex::new(())),
            trigger,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the one-shot initial sync and the timer thread.
    pub fn start(&self) -> std::io::Result<()> {
        let initial = {
            let context = Arc::clone(&self.context);
            let reconciler = Arc::clone(&self.reconciler);
            let pass_lock = Arc::clone(&self.pass_lock);
            std::thread::Builder::new()
                .name("initial-sync".to_string())
                .spawn(move || {
                    let _pass = pass_lock.lock().unwrap_or_else(|e| e.into_inner());
                    let _completion = SyncCompletion(context);
                    if let Err(e) = reconciler.initial_sync() {
                        log::error!("Initial sync failed: {}", e);
                    }
                })?
        };

        let timer = {
            let worker = TimerWorker {
                context: Arc::clone(&self.context),
                reconciler: Arc::clone(&self.reconciler),
                pass_lock: Arc::clone(&self.pass_lock),
                shutdown: Arc::clone(&self.shutdown),
            };
            let trigger_rx = self.trigger.subscribe();
            let cleanup_interval = self.cleanup_interval;
            let sync_interval = self.sync_interval;
            std::thread::Builder::new()
                .name("audit-scheduler".to_string())
                .spawn(move || worker.run(trigger_rx, cleanup_interval, sync_interval))?
        };

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.push(initial);
        handles.push(timer);
        log::info!(
            "Scheduler started: cleanup every {}s, full sync {}",
            self.cleanup_interval.as_secs(),
            self.sync_interval
                .map(|d| format!("every {}s", d.as_secs()))
                .unwrap_or_else(|| "disabled".to_string())
        );
        Ok(())
    }

    /// Requests one cleanup pass as soon as the timer thread is free.
    pub fn trigger(&self) {
        if self.trigger.send(()).is_err() {
            log::warn!("Scheduler is not running, trigger ignored");
        }
    }

    /// Signals the timer thread to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        // Wake the select loop so it sees the shutdown
        let _ = self.trigger.send(());
    }

    /// Waits for every scheduler thread to finish.
    pub fn join(&self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("Scheduler thread panicked");
            }
        }
    }
}

struct TimerWorker {
    context: Arc<AuditContext>,
    reconciler: Arc<Reconciler>,
    pass_lock: Arc<Mutex<()>>,
    shutdown: Arc<AtomicBool>,
}

impl TimerWorker {
    fn run(
        self,
        mut trigger_rx: broadcast::Receiver<()>,
        cleanup_interval: Duration,
        sync_interval: Option<Duration>,
    ) {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("Failed to start scheduler runtime: {}", e);
                return;
            }
        };
        let (mut cleanup_timer, mut sync_timer) = rt.block_on(async {
            (
                delayed_interval(cleanup_interval),
                sync_interval.map(delayed_interval),
            )
        });

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            // Passes run git over the network on their own runtime, so they
            // must run outside this block_on.
            let pass = rt.block_on(async {
                tokio::select! {
                    _ = cleanup_timer.tick() => Some(Pass::Cleanup),
                    _ = next_tick(&mut sync_timer) => Some(Pass::FullSync),
                    received = trigger_rx.recv() => match received {
                        Ok(()) | Err(RecvError::Lagged(_)) => Some(Pass::Manual),
                        Err(RecvError::Closed) => None,
                    },
                }
            });

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            match pass {
                Some(pass) => self.run_pass(pass),
                None => break,
            }
        }
        log::info!("Scheduler stopped");
    }

    fn run_pass(&self, pass: Pass) {
        if !self.context.is_sync_complete() {
            log::info!("Skipping {} pass, initial sync not complete", pass);
            return;
        }

        let _pass = match self.pass_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::info!("Skipping {} pass, another pass is still running", pass);
                return;
            }
        };

        log::info!("Running scheduled {} pass", pass);
        let result = match pass {
            Pass::Cleanup | Pass::Manual => self.reconciler.cleanup_pass().map(|_| ()),
            Pass::FullSync => self.reconciler.full_sync_pass().map(|_| ()),
        };
        if let Err(e) = result {
            log::error!("Scheduled {} pass failed ({:?}): {}", pass, e.policy(), e);
        }
    }
}

/// An interval whose first tick is one period from now.
fn delayed_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
