mod support;

use std::sync::Arc;

use chrono::Utc;
use labour_sync::logging::init_tracing;
use labour_sync::{
    DrainOutcome, LabourCommand, MutationOutcome, SyncConfig, SyncContext, SyncStatus,
};
use support::ScriptedSubmitter;

#[tokio::test]
async fn queued_action_survives_restart_and_drains_once_online() {
    init_tracing("labour_sync=debug");
    let dir = tempfile::tempdir().unwrap();
    let cfg = SyncConfig {
        database_path: dir.path().join("queue.db").to_string_lossy().into_owned(),
        reachability_interval_secs: 0,
        ..SyncConfig::default()
    };

    let start = LabourCommand::StartContraction {
        labour_id: "lab-1".into(),
        contraction_id: "c1".into(),
        start_time: Utc::now(),
    };

    {
        let ctx = SyncContext::open(cfg.clone(), Arc::new(ScriptedSubmitter::accepting()), false)
            .await
            .unwrap();
        let outcome = ctx.mutations.execute(&start).await.unwrap();
        assert!(matches!(outcome, MutationOutcome::Queued { .. }));
        assert_eq!(ctx.sync.state().pending_count, 1);
    }

    let submitter = Arc::new(ScriptedSubmitter::accepting());
    let ctx = SyncContext::open(cfg, submitter.clone(), true).await.unwrap();

    assert_eq!(submitter.received(), vec![start.to_value().unwrap()]);
    assert_eq!(ctx.queue.count().unwrap(), 0);
    assert_eq!(ctx.sync.state().status, SyncStatus::Idle);

    let again = ctx.sync.sync().await.unwrap();
    assert_eq!(again.outcome, DrainOutcome::Drained);
    assert_eq!(again.delivered, 0);
}
