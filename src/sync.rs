use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use crate::config::{RejectionPolicy, SyncConfig};
use crate::listeners::{ListenerSet, Subscription};
use crate::network::NetworkMonitor;
use crate::queue::{CommandQueue, QueueError, QueuedCommand};
use crate::submit::CommandSubmitter;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

/// What the UI sees: status badge, pending count, last failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    pub status: SyncStatus,
    pub pending_count: usize,
    pub last_error: Option<String>,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Offline,
    NotInitialized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No pass ran.
    Skipped(SkipReason),
    /// The queue was emptied.
    Drained,
    /// Connectivity dropped between two commands; nothing was failed.
    Paused,
    /// A submission hit a network-level failure; the rest stays queued.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: DrainOutcome,
    pub delivered: usize,
    pub rejected: usize,
    pub remaining: usize,
}

impl SyncReport {
    fn skipped(reason: SkipReason) -> Self {
        Self { outcome: DrainOutcome::Skipped(reason), delivered: 0, rejected: 0, remaining: 0 }
    }
}

#[derive(Default)]
struct Tally {
    delivered: usize,
    rejected: usize,
}

/// Clears the busy flag however the pass ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Where reconnect passes get spawned; bound by `initialize`.
#[derive(Clone)]
struct ReconnectTarget {
    runtime: Handle,
    manager: Weak<SyncManager>,
}

/// Replays queued commands against the submission endpoint.
///
/// At most one drain pass runs at a time; overlapping triggers (manual call,
/// reconnect, startup) collapse into the pass already in flight. Commands are
/// submitted one by one in queue order and each is awaited before the next.
pub struct SyncManager {
    queue: Arc<CommandQueue>,
    network: Arc<NetworkMonitor>,
    config: SyncConfig,
    submitter: RwLock<Option<Arc<dyn CommandSubmitter>>>,
    state: Mutex<SyncState>,
    listeners: ListenerSet<SyncState>,
    busy: AtomicBool,
    resync_requested: AtomicBool,
    reconnect: Mutex<Option<ReconnectTarget>>,
    network_sub: Mutex<Option<Subscription>>,
}

impl SyncManager {
    pub fn new(queue: Arc<CommandQueue>, network: Arc<NetworkMonitor>, config: SyncConfig) -> Self {
        Self {
            queue,
            network,
            config,
            submitter: RwLock::new(None),
            state: Mutex::new(SyncState::default()),
            listeners: ListenerSet::new(),
            busy: AtomicBool::new(false),
            resync_requested: AtomicBool::new(false),
            reconnect: Mutex::new(None),
            network_sub: Mutex::new(None),
        }
    }

    /// Bind the submission capability, start following the network monitor,
    /// and run a first pass if we are online.
    pub async fn initialize(
        self: &Arc<Self>,
        submitter: Arc<dyn CommandSubmitter>,
    ) -> Result<SyncReport, SyncError> {
        *self.submitter.write() = Some(submitter);

        let weak = Arc::downgrade(self);
        *self.reconnect.lock() =
            Some(ReconnectTarget { runtime: Handle::current(), manager: weak.clone() });
        let was_online = AtomicBool::new(self.network.is_online());
        let sub = self.network.subscribe(move |snap| {
            let before = was_online.swap(snap.is_online, Ordering::AcqRel);
            if snap.is_online && !before {
                if let Some(manager) = weak.upgrade() {
                    manager.schedule_reconnect_sync();
                }
            }
        });
        *self.network_sub.lock() = Some(sub);

        self.refresh_pending_count()?;
        self.sync().await
    }

    /// Spawn a pass after the settle delay. During an active pass the request
    /// is parked in `resync_requested` and picked up when that pass ends.
    fn schedule_reconnect_sync(&self) {
        // Set the flag before reading `busy`; the pass clears `busy` before
        // reading the flag, so one side always sees the other.
        self.resync_requested.store(true, Ordering::SeqCst);
        if self.is_syncing() {
            debug!("reconnected during an active pass; resync deferred");
            return;
        }
        if !self.resync_requested.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(target) = self.reconnect.lock().clone() else { return };
        let delay = self.config.settle_delay();
        info!(delay_ms = delay.as_millis() as u64, "reconnected; sync scheduled");
        target.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = target.manager.upgrade() else { return };
            if let Err(e) = manager.sync().await {
                warn!(error = %e, "sync after reconnect failed");
            }
        });
    }

    pub fn state(&self) -> SyncState {
        self.state.lock().clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Called with the current state right away, then after every change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.listeners.subscribe(|| self.state(), listener)
    }

    /// Re-read the queue length and publish it. Never drains.
    pub fn refresh_pending_count(&self) -> Result<usize, SyncError> {
        let n = self.queue.count()?;
        self.update_state(|s| s.pending_count = n);
        Ok(n)
    }

    /// Run one drain pass, unless one is running already or we are offline.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let submitter = self.submitter.read().clone();
        let Some(submitter) = submitter else {
            debug!("sync requested before initialize");
            return Ok(SyncReport::skipped(SkipReason::NotInitialized));
        };
        if !self.network.is_online() {
            debug!("offline; sync skipped");
            return Ok(SyncReport::skipped(SkipReason::Offline));
        }
        let Some(busy) = BusyGuard::acquire(&self.busy) else {
            debug!("sync already running");
            return Ok(SyncReport::skipped(SkipReason::AlreadyRunning));
        };

        let report = self.run_pass(submitter.as_ref()).await;
        drop(busy);
        if self.resync_requested.load(Ordering::SeqCst) {
            self.schedule_reconnect_sync();
        }
        report
    }

    async fn run_pass(&self, submitter: &dyn CommandSubmitter) -> Result<SyncReport, SyncError> {
        self.update_state(|s| s.status = SyncStatus::Syncing);

        let mut tally = Tally::default();
        let drained = self.drain(submitter, &mut tally).await;
        let result = drained.and_then(|outcome| Ok((outcome, self.queue.count()?)));
        let (outcome, remaining) = match result {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "sync pass aborted by storage failure");
                self.update_state(|s| {
                    s.status = SyncStatus::Error;
                    s.last_error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        self.update_state(|s| {
            s.pending_count = remaining;
            match &outcome {
                DrainOutcome::Failed(msg) => {
                    s.status = SyncStatus::Error;
                    s.last_error = Some(msg.clone());
                }
                _ => {
                    s.status = SyncStatus::Idle;
                    if remaining == 0 {
                        s.last_error = None;
                    }
                }
            }
        });

        info!(
            delivered = tally.delivered,
            rejected = tally.rejected,
            remaining,
            outcome = ?outcome,
            "sync pass finished"
        );
        Ok(SyncReport { outcome, delivered: tally.delivered, rejected: tally.rejected, remaining })
    }

    async fn drain(
        &self,
        submitter: &dyn CommandSubmitter,
        tally: &mut Tally,
    ) -> Result<DrainOutcome, SyncError> {
        // Re-list after each batch so commands enqueued mid-pass still go out
        // behind the ones already queued.
        loop {
            let batch = self.queue.list_pending()?;
            if batch.is_empty() {
                return Ok(DrainOutcome::Drained);
            }

            for cmd in batch {
                if !self.network.is_online() {
                    info!(command_id = %cmd.id, "went offline mid-pass; pausing");
                    return Ok(DrainOutcome::Paused);
                }

                match submitter.submit_raw(&cmd.command).await {
                    Ok(outcome) if outcome.success => {
                        self.queue.remove(&cmd.id)?;
                        tally.delivered += 1;
                        debug!(
                            command_id = %cmd.id,
                            aggregate_id = %cmd.aggregate_id,
                            "command delivered"
                        );
                    }
                    Ok(outcome) => {
                        let reason = outcome.error.unwrap_or_else(|| "rejected".to_string());
                        self.handle_rejection(&cmd, &reason)?;
                        tally.rejected += 1;
                    }
                    Err(e) => {
                        warn!(command_id = %cmd.id, error = %e, "submission failed; stopping pass");
                        return Ok(DrainOutcome::Failed(e.to_string()));
                    }
                }

                self.refresh_pending_count()?;
            }
        }
    }

    fn handle_rejection(&self, cmd: &QueuedCommand, reason: &str) -> Result<(), QueueError> {
        match self.config.rejection_policy {
            RejectionPolicy::Drop => {
                warn!(
                    command_id = %cmd.id,
                    aggregate_id = %cmd.aggregate_id,
                    reason,
                    "command rejected; dropped"
                );
                self.queue.remove(&cmd.id)
            }
            RejectionPolicy::DeadLetter => {
                warn!(
                    command_id = %cmd.id,
                    aggregate_id = %cmd.aggregate_id,
                    reason,
                    "command rejected; dead-lettered"
                );
                self.queue.dead_letter(cmd, reason)
            }
        }
    }

    /// Mutate the state and broadcast it if it changed. The state lock is
    /// released before listeners run, but the publish gate keeps concurrent
    /// updates from being delivered out of order.
    fn update_state(&self, f: impl FnOnce(&mut SyncState)) {
        self.listeners.publish(|| {
            let mut state = self.state.lock();
            let before = state.clone();
            f(&mut *state);
            (*state != before).then(|| state.clone())
        });
    }
}
