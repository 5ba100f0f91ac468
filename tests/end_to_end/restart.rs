//! Oracle restart over a durable timestamp log

use crate::common::{writes, Harness};
use tempfile::TempDir;
use tso::durability::DurabilityMode;
use tso::server::ServerConfig;

fn durable(dir: &TempDir, durability: DurabilityMode) -> ServerConfig {
    ServerConfig {
        data_dir: Some(dir.path().to_path_buf()),
        durability,
        reservation_window: 8,
        ..ServerConfig::ephemeral()
    }
}

async fn restart_never_reissues(durability: DurabilityMode) {
    let dir = TempDir::new().unwrap();

    let harness = Harness::start(durable(&dir, durability)).await;
    let client = harness.client().await;
    let mut last = client.new_start_timestamp().await.unwrap();
    for _ in 0..20 {
        last = client.new_start_timestamp().await.unwrap();
    }
    let in_flight = client.new_start_timestamp().await.unwrap();
    let commit = client.commit(last, writes(&["alice"])).await.unwrap();
    client.close().await;
    harness.stop().await;

    let harness = Harness::start(durable(&dir, durability)).await;
    let client = harness.client().await;
    let resumed = client.new_start_timestamp().await.unwrap();
    assert!(resumed > commit, "{} reissued after {}", resumed, commit);

    // Transactions that started before the restart abort conservatively
    let err = client
        .commit(in_flight, writes(&["bob"]))
        .await
        .unwrap_err();
    assert!(err.is_abort());

    let fresh = client.commit(resumed, writes(&["bob"])).await.unwrap();
    assert!(fresh > resumed);

    harness.stop().await;
}

#[tokio::test]
async fn test_strict_restart_never_reissues() {
    restart_never_reissues(DurabilityMode::Strict).await;
}

#[tokio::test]
async fn test_batched_restart_never_reissues() {
    restart_never_reissues(DurabilityMode::Batched {
        interval_ms: 1000,
        batch_size: 4,
    })
    .await;
}
