//! Snapshot-isolation commit protocol over the network

use crate::common::{writes, Harness};
use std::collections::HashSet;
use tso::client::ClientError;
use tso::types::{Timestamp, WriteSet};
use tso::Error;

#[tokio::test]
async fn test_first_committer_wins() {
    let harness = Harness::ephemeral().await;
    let client = harness.client().await;

    let t1 = client.new_start_timestamp().await.unwrap();
    let t2 = client.new_start_timestamp().await.unwrap();
    assert!(t2 > t1);

    let c1 = client.commit(t1, writes(&["alice"])).await.unwrap();
    assert!(c1 > t2);

    let err = client
        .commit(t2, writes(&["alice", "bob"]))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::Aborted { start_timestamp: t2 });

    // Starting after the winner committed sees no conflict
    let t3 = client.new_start_timestamp().await.unwrap();
    let c3 = client.commit(t3, writes(&["alice"])).await.unwrap();
    assert!(c3 > c1);

    harness.stop().await;
}

#[tokio::test]
async fn test_read_only_transaction_commits() {
    let harness = Harness::ephemeral().await;
    let client = harness.client().await;

    let start = client.new_start_timestamp().await.unwrap();
    let commit = client.commit(start, WriteSet::new()).await.unwrap();
    assert!(commit > start);

    harness.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_get_unique_ordered_timestamps() {
    const CLIENTS: usize = 8;
    const PER_CLIENT: usize = 50;

    let harness = Harness::ephemeral().await;
    let mut tasks = Vec::new();
    for _ in 0..CLIENTS {
        let client = harness.client().await;
        tasks.push(tokio::spawn(async move {
            let mut issued = Vec::with_capacity(PER_CLIENT);
            for _ in 0..PER_CLIENT {
                issued.push(client.new_start_timestamp().await.unwrap());
            }
            issued
        }));
    }

    let mut all = HashSet::new();
    for task in tasks {
        let issued = task.await.unwrap();
        assert!(issued.windows(2).all(|w| w[0] < w[1]));
        all.extend(issued);
    }
    assert_eq!(all.len(), CLIENTS * PER_CLIENT);
    assert!(!all.contains(&Timestamp::ZERO));

    harness.stop().await;
}

#[tokio::test]
async fn test_disjoint_concurrent_commits_all_succeed() {
    const TRANSACTIONS: usize = 32;

    let harness = Harness::ephemeral().await;
    let client = harness.client().await;

    let mut tasks = Vec::new();
    for i in 0..TRANSACTIONS {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let start = client.new_start_timestamp().await?;
            let row = format!("row-{}", i);
            let commit = client.commit(start, writes(&[row.as_str()])).await?;
            Ok::<_, ClientError>((start, commit))
        }));
    }

    let mut commits = HashSet::new();
    for task in tasks {
        let (start, commit) = task.await.unwrap().unwrap();
        assert!(commit > start);
        assert!(commits.insert(commit));
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_contended_cell_has_one_winner() {
    const CONTENDERS: usize = 16;

    let harness = Harness::ephemeral().await;
    let client = harness.client().await;

    let mut starts = Vec::new();
    for _ in 0..CONTENDERS {
        starts.push(client.new_start_timestamp().await.unwrap());
    }

    let mut tasks = Vec::new();
    for start in starts {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client.commit(start, writes(&["hot"])).await
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(e.is_abort(), "unexpected error {:?}", e),
        }
    }
    assert_eq!(winners, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_unissued_start_timestamp_is_rejected() {
    let harness = Harness::ephemeral().await;
    let client = harness.client().await;

    let err = client
        .commit(Timestamp::new(1_000_000), writes(&["alice"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));

    let err: Error = client
        .commit(Timestamp::ZERO, writes(&["alice"]))
        .await
        .unwrap_err()
        .into();
    assert!(!err.is_retryable());
    assert!(!err.is_abort());

    harness.stop().await;
}
