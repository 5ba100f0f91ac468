//! Repeated commits and observer notification

use crate::common::{writes, Harness};
use std::time::Duration;
use tso::client::{ClientError, CommitOptions, HeuristicCause};
use tso::server::Interest;
use tso::Error;

#[tokio::test]
async fn test_repeated_commit_with_heuristic_flag_returns_original_decision() {
    let harness = Harness::ephemeral().await;
    let client = harness.client().await;

    let start = client.new_start_timestamp().await.unwrap();
    client.commit(start, writes(&["alice"])).await.unwrap();

    // Without the flag the repeat is decided again and conflicts with itself
    let err = client
        .commit(start, writes(&["alice"]))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::Aborted { start_timestamp: start });

    let err = client
        .commit_with(
            start,
            writes(&["alice"]),
            CommitOptions {
                allow_heuristic_decision: true,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ClientError::Heuristic {
            start_timestamp: start,
            cause: HeuristicCause::ServerFlagged,
        }
    );

    let err: Error = err.into();
    assert!(err.is_heuristic());
    assert!(!err.is_retryable());

    harness.stop().await;
}

#[tokio::test]
async fn test_shared_start_disjoint_write_sets_are_decided_separately() {
    let harness = Harness::ephemeral().await;
    let client = harness.client().await;
    let flagged = CommitOptions {
        allow_heuristic_decision: true,
    };

    let start = client.new_start_timestamp().await.unwrap();
    let first = client.commit(start, writes(&["alice"])).await.unwrap();

    // Same start, different cells: a new transaction, not a repeat
    let second = client
        .commit_with(start, writes(&["bob"]), flagged)
        .await
        .unwrap();
    assert!(second > first);

    // Both are now remembered under their own write sets
    for rows in [&["alice"][..], &["bob"][..]] {
        let err = client
            .commit_with(start, writes(rows), flagged)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::Heuristic {
                start_timestamp: start,
                cause: HeuristicCause::ServerFlagged,
            }
        );
    }

    // Bob's cell went through the conflict check and was recorded
    let err = client
        .commit_with(start, writes(&["bob", "carol"]), flagged)
        .await
        .unwrap_err();
    assert!(err.is_abort());

    harness.stop().await;
}

#[tokio::test]
async fn test_observers_see_committed_cells_only() {
    let harness = Harness::ephemeral().await;
    let mut notifications = harness
        .observers
        .register_interest("indexer", Interest::new("accounts", "cf", "balance"));
    let client = harness.client().await;

    let t1 = client.new_start_timestamp().await.unwrap();
    let t2 = client.new_start_timestamp().await.unwrap();
    let c1 = client.commit(t1, writes(&["alice"])).await.unwrap();
    assert!(client.commit(t2, writes(&["alice"])).await.unwrap_err().is_abort());

    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.observer, "indexer");
    assert_eq!(notification.start_timestamp, t1);
    assert_eq!(notification.commit_timestamp, c1);

    // The aborted transaction produced nothing
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(notifications.try_recv().is_err());
    assert_eq!(harness.observers.delivered(), 1);

    harness.stop().await;
}
