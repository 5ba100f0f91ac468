//! Wire-level tests of the TSO server

use std::net::SocketAddr;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tso_core::{
    CellId, CommitRequest, Request, RequestEnvelope, RequestId, Response, ResponseEnvelope,
    Timestamp, WriteSet,
};
use tso_durability::DurabilityMode;
use tso_server::{Interest, ServerConfig, ServerError, ShutdownHandle, TsoServer};
use tso_wire::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    task: JoinHandle<Result<(), ServerError>>,
}

async fn start(config: ServerConfig) -> (Running, std::sync::Arc<tso_server::ObserverRegistry>) {
    let server = TsoServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let observers = server.observers();
    let task = tokio::spawn(server.run());
    (
        Running {
            addr,
            shutdown,
            task,
        },
        observers,
    )
}

impl Running {
    async fn stop(self) {
        self.shutdown.shutdown();
        self.task.await.unwrap().unwrap();
    }
}

struct RawClient {
    stream: TcpStream,
    next_id: u64,
}

impl RawClient {
    async fn connect(addr: SocketAddr) -> Self {
        RawClient {
            stream: TcpStream::connect(addr).await.unwrap(),
            next_id: 0,
        }
    }

    async fn send(&mut self, request: Request) -> RequestId {
        self.next_id += 1;
        let id = RequestId::new(self.next_id);
        write_frame(
            &mut self.stream,
            &RequestEnvelope::new(id, request),
            DEFAULT_MAX_FRAME_SIZE,
        )
        .await
        .unwrap();
        id
    }

    /// Next response, or `None` once the server closed the connection
    async fn recv(&mut self) -> Option<ResponseEnvelope> {
        tokio::time::timeout(
            Duration::from_secs(5),
            read_frame(&mut self.stream, DEFAULT_MAX_FRAME_SIZE),
        )
        .await
        .unwrap()
        .ok()
        .flatten()
    }

    async fn call(&mut self, request: Request) -> Response {
        let id = self.send(request).await;
        let reply = self.recv().await.unwrap();
        assert_eq!(reply.request_id, id);
        reply.response
    }

    async fn timestamp(&mut self) -> Timestamp {
        match self.call(Request::Timestamp).await {
            Response::Timestamp { timestamp } => timestamp,
            other => panic!("unexpected {:?}", other),
        }
    }
}

fn ws(rows: &[&str]) -> WriteSet {
    rows.iter().map(|r| CellId::new("t", *r, "f", "q")).collect()
}

fn commit(start: Timestamp, rows: &[&str]) -> Request {
    Request::Commit(CommitRequest::new(start, ws(rows)))
}

#[tokio::test]
async fn test_commit_then_stale_retry_over_the_wire() {
    let (server, _) = start(ServerConfig::ephemeral()).await;
    let mut client = RawClient::connect(server.addr).await;

    let start = client.timestamp().await;
    assert_eq!(start, Timestamp::new(1));

    assert_eq!(
        client.call(commit(start, &["cellA"])).await,
        Response::Commit {
            requires_heuristic_action: false,
            start_timestamp: Timestamp::new(1),
            commit_timestamp: Timestamp::new(2),
        }
    );
    assert_eq!(
        client.call(commit(start, &["cellA"])).await,
        Response::Abort {
            start_timestamp: Timestamp::new(1)
        }
    );

    server.stop().await;
}

#[tokio::test]
async fn test_pipelined_requests_are_all_answered() {
    let (server, _) = start(ServerConfig::ephemeral()).await;
    let mut client = RawClient::connect(server.addr).await;

    let mut sent = Vec::new();
    for _ in 0..32 {
        sent.push(client.send(Request::Timestamp).await);
    }

    let mut timestamps = Vec::new();
    let mut answered = Vec::new();
    for _ in 0..32 {
        let reply = client.recv().await.unwrap();
        answered.push(reply.request_id);
        match reply.response {
            Response::Timestamp { timestamp } => timestamps.push(timestamp),
            other => panic!("unexpected {:?}", other),
        }
    }

    answered.sort();
    assert_eq!(answered, sent);
    timestamps.sort();
    timestamps.dedup();
    assert_eq!(timestamps.len(), 32);

    server.stop().await;
}

#[tokio::test]
async fn test_unissued_start_timestamp_is_rejected() {
    let (server, _) = start(ServerConfig::ephemeral()).await;
    let mut client = RawClient::connect(server.addr).await;

    let response = client.call(commit(Timestamp::new(1000), &["a"])).await;
    assert!(matches!(response, Response::Rejected { .. }));

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_closes_connection_only() {
    let (server, _) = start(ServerConfig::ephemeral()).await;

    let mut bad = TcpStream::connect(server.addr).await.unwrap();
    bad.write_all(&[0, 0, 0, 3, 0xff, 0xff, 0xff]).await.unwrap();
    let closed: Option<ResponseEnvelope> = tokio::time::timeout(
        Duration::from_secs(5),
        read_frame(&mut bad, DEFAULT_MAX_FRAME_SIZE),
    )
    .await
    .unwrap()
    .unwrap_or(None);
    assert!(closed.is_none());

    // Other connections are unaffected
    let mut good = RawClient::connect(server.addr).await;
    good.timestamp().await;

    server.stop().await;
}

#[tokio::test]
async fn test_observers_hear_replied_commits() {
    let (server, observers) = start(ServerConfig::ephemeral()).await;
    let mut rx = observers.register_interest("watcher", Interest::new("t", "f", "q"));
    let mut client = RawClient::connect(server.addr).await;

    let start = client.timestamp().await;
    client.call(commit(start, &["row"])).await;
    // Aborted duplicate must not notify
    client.call(commit(start, &["row"])).await;

    let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.cell, CellId::new("t", "row", "f", "q"));
    assert_eq!(notification.start_timestamp, start);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_restart_never_reissues_and_aborts_old_transactions() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        data_dir: Some(dir.path().to_path_buf()),
        durability: DurabilityMode::Strict,
        reservation_window: 8,
        ..ServerConfig::ephemeral()
    };

    let (first, _) = start(config.clone()).await;
    let mut client = RawClient::connect(first.addr).await;
    let mut last = Timestamp::ZERO;
    for _ in 0..20 {
        last = client.timestamp().await;
    }
    let old_start = last;
    drop(client);
    first.stop().await;

    let (second, _) = start(config).await;
    let mut client = RawClient::connect(second.addr).await;
    let fresh = client.timestamp().await;
    assert!(fresh > last);

    // Started before the restart: the history was lost, so it aborts
    assert_eq!(
        client.call(commit(old_start, &["x"])).await,
        Response::Abort {
            start_timestamp: old_start
        }
    );
    // Started after the restart: commits
    assert!(matches!(
        client.call(commit(fresh, &["x"])).await,
        Response::Commit { .. }
    ));

    second.stop().await;
}

#[tokio::test]
async fn test_exhausted_oracle_halts_server() {
    use std::sync::Arc;
    use tso_concurrency::{CommitManager, ManagerOptions, TimestampOracle};
    use tso_durability::TimestampLog;

    let oracle = TimestampOracle::new(TimestampLog::ephemeral(), Timestamp::new(u64::MAX - 1), 1);
    let manager = Arc::new(CommitManager::new(oracle, ManagerOptions::default()));
    let server = TsoServer::with_manager(manager, &ServerConfig::ephemeral())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn(server.run());

    let mut client = RawClient::connect(addr).await;
    assert_eq!(client.timestamp().await, Timestamp::MAX);

    // Next allocation exhausts the space: no reply, server halts
    client.send(Request::Timestamp).await;
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ServerError::Halted(_))));

    // Connection is closed without an answer
    assert!(client.recv().await.is_none());
}
