//! One TCP connection to the oracle
//!
//! A reader task completes pending requests as responses arrive; a writer
//! task drains the outbound frame queue. Either task ending marks the
//! connection dead and resolves every request of its generation as lost.

use crate::error::ClientError;
use crate::pending::PendingRequestStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tso_core::ResponseEnvelope;
use tso_wire::read_frame;

pub(crate) struct Connection {
    generation: u64,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    alive: Arc<AtomicBool>,
    store: Arc<PendingRequestStore>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    pub(crate) async fn connect(
        addr: &str,
        connect_timeout: Duration,
        max_frame_size: usize,
        store: Arc<PendingRequestStore>,
        generation: u64,
    ) -> Result<Self, ClientError> {
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::Connectivity(format!("connect to {}: {}", addr, e))),
            Err(_) => {
                return Err(ClientError::Connectivity(format!(
                    "connect to {} timed out after {:?}",
                    addr, connect_timeout
                )))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        info!(addr, generation, "Connected to TSO");

        let (reader, writer) = stream.into_split();
        let (frames, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_responses(
            reader,
            max_frame_size,
            Arc::clone(&store),
            Arc::clone(&alive),
            generation,
        ));
        let writer = tokio::spawn(write_requests(
            writer,
            rx,
            Arc::clone(&store),
            Arc::clone(&alive),
            generation,
        ));

        Ok(Connection {
            generation,
            frames,
            alive,
            store,
            reader,
            writer,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Queue a frame; fails if the writer is gone
    pub(crate) fn send(&self, frame: Vec<u8>) -> Result<(), ClientError> {
        self.frames
            .send(frame)
            .map_err(|_| ClientError::Connectivity("connection writer closed".into()))
    }

    /// Tear the connection down and resolve its outstanding requests
    pub(crate) fn shutdown(&self, reason: &str) {
        self.reader.abort();
        self.writer.abort();
        connection_lost(&self.alive, &self.store, self.generation, reason);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown("connection dropped");
    }
}

fn connection_lost(alive: &AtomicBool, store: &PendingRequestStore, generation: u64, reason: &str) {
    if alive.swap(false, Ordering::SeqCst) {
        warn!(generation, reason, "TSO connection lost");
    }
    let failed = store.fail_connection(generation);
    if failed > 0 {
        warn!(generation, failed, "Resolved outstanding requests of lost connection");
    }
}

async fn read_responses(
    mut reader: OwnedReadHalf,
    max_frame_size: usize,
    store: Arc<PendingRequestStore>,
    alive: Arc<AtomicBool>,
    generation: u64,
) {
    let reason = loop {
        match read_frame::<_, ResponseEnvelope>(&mut reader, max_frame_size).await {
            Ok(Some(envelope)) => {
                store.complete(envelope.request_id, envelope.response);
            }
            Ok(None) => break "closed by server".to_string(),
            Err(e) => break e.to_string(),
        }
    };
    connection_lost(&alive, &store, generation, &reason);
}

async fn write_requests(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    store: Arc<PendingRequestStore>,
    alive: Arc<AtomicBool>,
    generation: u64,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            connection_lost(&alive, &store, generation, &e.to_string());
            return;
        }
    }
    let _ = writer.shutdown().await;
}
