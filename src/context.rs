use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::QueryCache;
use crate::config::SyncConfig;
use crate::mutation::MutationLayer;
use crate::network::{HttpReachabilityProbe, NetworkMonitor};
use crate::queue::{CommandQueue, QueueError};
use crate::submit::{CommandSubmitter, HttpCommandClient, TokenProvider};
use crate::sync::{SyncError, SyncManager};

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    #[error("sync: {0}")]
    Sync(#[from] SyncError),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Composition root: owns one instance of every offline-sync service and
/// hands out shared references. Nothing here is global.
pub struct SyncContext {
    pub queue: Arc<CommandQueue>,
    pub network: Arc<NetworkMonitor>,
    pub sync: Arc<SyncManager>,
    pub cache: Arc<QueryCache>,
    pub mutations: MutationLayer,
    probe_task: Option<JoinHandle<()>>,
}

impl SyncContext {
    /// Wire everything up against an arbitrary submitter and run the initial sync.
    pub async fn open(
        config: SyncConfig,
        submitter: Arc<dyn CommandSubmitter>,
        initially_online: bool,
    ) -> Result<Self, ContextError> {
        let queue = Arc::new(CommandQueue::open(&config.database_path)?);
        let network = Arc::new(NetworkMonitor::new(initially_online));

        let probe_task = match config.reachability_interval() {
            Some(interval) => {
                let probe = HttpReachabilityProbe::new(
                    config.api_base_url.clone(),
                    config.submit_timeout(),
                )?;
                Some(network.spawn_reachability_checks(Arc::new(probe), interval))
            }
            None => None,
        };

        let sync = Arc::new(SyncManager::new(queue.clone(), network.clone(), config));
        let report = sync.initialize(submitter.clone()).await?;
        info!(outcome = ?report.outcome, remaining = report.remaining, "offline sync ready");

        let cache = Arc::new(QueryCache::new());
        let mutations = MutationLayer::new(
            cache.clone(),
            queue.clone(),
            network.clone(),
            submitter,
            sync.clone(),
        );

        Ok(Self { queue, network, sync, cache, mutations, probe_task })
    }

    /// Same as `open`, submitting over HTTP to `config.api_base_url`.
    pub async fn open_http(
        config: SyncConfig,
        tokens: Arc<dyn TokenProvider>,
        initially_online: bool,
    ) -> Result<Self, ContextError> {
        let client = HttpCommandClient::new(&config.api_base_url, tokens, config.submit_timeout())?;
        Self::open(config, Arc::new(client), initially_online).await
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        if let Some(task) = self.probe_task.take() {
            task.abort();
        }
    }
}
