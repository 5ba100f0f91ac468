//! Shared fixtures for end-to-end tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tso::client::{ClientConfig, RetryPolicy, TsoClient};
use tso::server::{ObserverRegistry, ServerConfig, ServerError, ShutdownHandle, TsoServer};
use tso::types::{CellId, WriteSet};

/// A server running on a background task
pub struct Harness {
    pub port: u16,
    pub observers: Arc<ObserverRegistry>,
    shutdown: ShutdownHandle,
    task: JoinHandle<Result<(), ServerError>>,
}

impl Harness {
    pub async fn start(config: ServerConfig) -> Self {
        let server = TsoServer::bind(&config).await.unwrap();
        let port = server.local_addr().unwrap().port();
        let observers = server.observers();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());
        Harness {
            port,
            observers,
            shutdown,
            task,
        }
    }

    pub async fn ephemeral() -> Self {
        Self::start(ServerConfig::ephemeral()).await
    }

    pub async fn client(&self) -> TsoClient {
        let config = ClientConfig::builder()
            .port(self.port)
            .request_timeout(Some(Duration::from_secs(5)))
            .retry(RetryPolicy::none())
            .build()
            .unwrap();
        TsoClient::connect(config).await.unwrap()
    }

    pub async fn stop(self) {
        self.shutdown.shutdown();
        self.task.await.unwrap().unwrap();
    }
}

pub fn cell(row: &str) -> CellId {
    CellId::new("accounts", row, "cf", "balance")
}

pub fn writes(rows: &[&str]) -> WriteSet {
    rows.iter().map(|row| cell(row)).collect()
}
