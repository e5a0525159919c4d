use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cache::{QueryCache, QueryKey};
use crate::command::LabourCommand;
use crate::merge::{patch_by_key, remove_by_key, upsert_by_key};
use crate::network::NetworkMonitor;
use crate::queue::{CommandQueue, QueueError};
use crate::submit::{CommandSubmitter, TransportError};
use crate::sync::{SyncError, SyncManager};

/// A state-changing user action that can be applied to cached read state
/// ahead of server confirmation.
pub trait OptimisticAction: Send + Sync {
    fn aggregate_id(&self) -> &str;

    /// The opaque `{type, payload}` envelope sent to the command endpoint.
    fn envelope(&self) -> Result<Value, serde_json::Error>;

    fn query_key(&self) -> QueryKey {
        QueryKey::labour(self.aggregate_id())
    }

    /// Compute the optimistic read state from the cached one.
    /// `None` leaves the cache alone.
    fn apply_optimistic(&self, cached: Option<&Value>) -> Option<Value>;

    /// Whether the online path should also update the cache before the server answers.
    fn optimistic_when_online(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Accepted by the server; the read state was invalidated.
    Submitted,
    /// Offline: persisted for later replay.
    Queued { command_id: String },
}

#[derive(Error, Debug)]
pub enum MutationError {
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    #[error("sync: {0}")]
    Sync(#[from] SyncError),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Routes user actions to the server or the offline queue, keeping the
/// cached read state in step.
///
/// Online failures roll the cache back to the snapshot taken before the
/// action. Offline actions are never rolled back; the next authoritative
/// refetch reconciles them.
pub struct MutationLayer {
    cache: Arc<QueryCache>,
    queue: Arc<CommandQueue>,
    network: Arc<NetworkMonitor>,
    submitter: Arc<dyn CommandSubmitter>,
    sync: Arc<SyncManager>,
}

impl MutationLayer {
    pub fn new(
        cache: Arc<QueryCache>,
        queue: Arc<CommandQueue>,
        network: Arc<NetworkMonitor>,
        submitter: Arc<dyn CommandSubmitter>,
        sync: Arc<SyncManager>,
    ) -> Self {
        Self { cache, queue, network, submitter, sync }
    }

    #[instrument(skip_all, fields(aggregate_id = action.aggregate_id()))]
    pub async fn execute<A>(&self, action: &A) -> Result<MutationOutcome, MutationError>
    where
        A: OptimisticAction + ?Sized,
    {
        let envelope = action.envelope()?;
        let key = action.query_key();

        if !self.network.is_online() {
            let command_id = self.queue.enqueue(action.aggregate_id(), &envelope)?;
            if let Some(next) = action.apply_optimistic(self.cache.get(&key).as_ref()) {
                self.cache.set(key, next);
            }
            self.sync.refresh_pending_count()?;
            info!(command_id = %command_id, "offline; command queued");
            return Ok(MutationOutcome::Queued { command_id });
        }

        let snapshot = self.cache.snapshot(&key);
        let mut applied = false;
        if action.optimistic_when_online() {
            if let Some(next) = action.apply_optimistic(snapshot.value()) {
                self.cache.set(key.clone(), next);
                applied = true;
            }
        }

        let result = self.submitter.submit_raw(&envelope).await;
        let err = match result {
            Ok(outcome) if outcome.success => {
                debug!(key = %key, "submitted; invalidating");
                self.cache.invalidate(&key);
                return Ok(MutationOutcome::Submitted);
            }
            Ok(outcome) => {
                MutationError::Rejected(outcome.error.unwrap_or_else(|| "rejected".to_string()))
            }
            Err(e) => MutationError::Transport(e),
        };

        if applied {
            self.cache.restore(key, snapshot);
        }
        warn!(error = %err, rolled_back = applied, "mutation failed");
        Err(err)
    }
}

impl OptimisticAction for LabourCommand {
    fn aggregate_id(&self) -> &str {
        LabourCommand::aggregate_id(self)
    }

    fn envelope(&self) -> Result<Value, serde_json::Error> {
        self.to_value()
    }

    fn optimistic_when_online(&self) -> bool {
        // Announcements only show once the server has them.
        !matches!(self, Self::PostLabourUpdate { .. })
    }

    fn apply_optimistic(&self, cached: Option<&Value>) -> Option<Value> {
        let mut labour = cached?.clone();
        match self {
            Self::StartContraction { contraction_id, start_time, .. } => upsert_by_key(
                &mut labour,
                "contractions",
                "id",
                json!({
                    "id": contraction_id,
                    "start_time": start_time,
                    "end_time": null,
                    "intensity": null,
                }),
            ),
            Self::EndContraction { contraction_id, end_time, intensity, .. } => {
                patch_by_key(
                    &mut labour,
                    "contractions",
                    "id",
                    contraction_id,
                    &json!({ "end_time": end_time, "intensity": intensity }),
                );
            }
            Self::UpdateContraction { contraction_id, start_time, end_time, intensity, .. } => {
                patch_by_key(
                    &mut labour,
                    "contractions",
                    "id",
                    contraction_id,
                    &json!({
                        "start_time": start_time,
                        "end_time": end_time,
                        "intensity": intensity,
                    }),
                );
            }
            Self::DeleteContraction { contraction_id, .. } => {
                remove_by_key(&mut labour, "contractions", "id", contraction_id);
            }
            Self::PostLabourUpdate { update_id, update_type, message, sent_time, .. } => {
                upsert_by_key(
                    &mut labour,
                    "labour_updates",
                    "id",
                    json!({
                        "id": update_id,
                        "update_type": update_type,
                        "message": message,
                        "sent_time": sent_time,
                    }),
                )
            }
        }
        Some(labour)
    }
}
