#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use labour_sync::{
    CommandQueue, CommandSubmitter, NetworkMonitor, SubmitOutcome, SyncConfig, SyncManager,
    TransportError,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Notify;

/// What the fake endpoint answers for one submission.
#[derive(Debug, Clone)]
pub enum Reply {
    Accept,
    Reject(&'static str),
    Fail,
}

pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// Submitter that records what it receives and answers from a script.
/// Once the script runs out every command is accepted.
#[derive(Default)]
pub struct ScriptedSubmitter {
    script: Mutex<VecDeque<Reply>>,
    received: Mutex<Vec<Value>>,
    gate: Option<Gate>,
    after_submit: Option<Hook>,
}

impl ScriptedSubmitter {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn scripted(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self { script: Mutex::new(replies.into_iter().collect()), ..Self::default() }
    }

    /// The first submission blocks until `gate().release` is notified.
    pub fn gated() -> Self {
        Self {
            gate: Some(Gate { entered: Notify::new(), release: Notify::new() }),
            ..Self::default()
        }
    }

    /// Run `hook(n)` after the n-th submission (1-based) has been answered.
    pub fn with_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.after_submit = Some(Box::new(hook));
        self
    }

    pub fn gate(&self) -> &Gate {
        self.gate.as_ref().expect("submitter was not built with gated()")
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl CommandSubmitter for ScriptedSubmitter {
    async fn submit_raw(&self, command: &Value) -> Result<SubmitOutcome, TransportError> {
        let n = {
            let mut received = self.received.lock();
            received.push(command.clone());
            received.len()
        };
        if let Some(gate) = &self.gate {
            if n == 1 {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }

        let reply = self.script.lock().pop_front().unwrap_or(Reply::Accept);
        if let Some(hook) = &self.after_submit {
            hook(n);
        }
        match reply {
            Reply::Accept => Ok(SubmitOutcome::accepted()),
            Reply::Reject(reason) => Ok(SubmitOutcome::rejected(reason)),
            Reply::Fail => Err(TransportError::Connection("connection reset".into())),
        }
    }
}

pub fn cmd(n: usize) -> Value {
    json!({
        "type": "StartContraction",
        "payload": { "labour_id": "lab-1", "contraction_id": format!("c{n}") }
    })
}

pub fn config() -> SyncConfig {
    SyncConfig { settle_delay_ms: 200, reachability_interval_secs: 0, ..SyncConfig::default() }
}

pub fn manager(
    queue: Arc<CommandQueue>,
    online: bool,
    config: SyncConfig,
) -> (Arc<SyncManager>, Arc<NetworkMonitor>) {
    let network = Arc::new(NetworkMonitor::new(online));
    (Arc::new(SyncManager::new(queue, network.clone(), config)), network)
}

pub fn queue_with(n: usize) -> (Arc<CommandQueue>, Vec<String>) {
    let queue = Arc::new(CommandQueue::open_in_memory().unwrap());
    let ids = (0..n).map(|i| queue.enqueue("lab-1", &cmd(i)).unwrap()).collect();
    (queue, ids)
}

pub fn pending_ids(queue: &CommandQueue) -> Vec<String> {
    queue.list_pending().unwrap().into_iter().map(|c| c.id).collect()
}
