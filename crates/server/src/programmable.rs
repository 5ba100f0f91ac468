//! Programmable server for client tests
//!
//! Speaks the oracle protocol but takes no decisions: each request is
//! answered with the next queued [`Response`], echoing the request
//! identifier. With nothing queued the request is left unanswered, which
//! lets tests hold requests outstanding and then cut the connection.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tso_core::{Request, RequestEnvelope, RequestKind, Response, ResponseEnvelope};
use tso_wire::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};

#[derive(Default)]
struct ProgramState {
    responses: Mutex<VecDeque<Response>>,
    received: Mutex<Vec<RequestEnvelope>>,
    accepted: AtomicUsize,
}

/// Scripted oracle server
pub struct ProgrammableServer {
    addr: SocketAddr,
    state: Arc<ProgramState>,
    drop_tx: watch::Sender<u64>,
    accept_task: JoinHandle<()>,
}

impl ProgrammableServer {
    /// Listen on an ephemeral local port
    pub async fn start() -> std::io::Result<Self> {
        Self::bind("127.0.0.1:0").await
    }

    /// Listen on `addr`
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ProgramState::default());
        let (drop_tx, drop_rx) = watch::channel(0u64);

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&state), drop_rx));
        Ok(ProgrammableServer {
            addr,
            state,
            drop_tx,
            accept_task,
        })
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Answer a future request with `response`
    pub fn queue_response(&self, response: Response) {
        self.state.responses.lock().push_back(response);
    }

    /// Forget every queued response and every recorded request
    pub fn clean_responses(&self) {
        self.state.responses.lock().clear();
        self.state.received.lock().clear();
    }

    /// Requests received so far, in arrival order
    pub fn received(&self) -> Vec<RequestEnvelope> {
        self.state.received.lock().clone()
    }

    /// Number of received requests of `kind`
    pub fn received_of(&self, kind: RequestKind) -> usize {
        self.state
            .received
            .lock()
            .iter()
            .filter(|e| e.request.kind() == kind)
            .count()
    }

    /// Connections accepted so far
    pub fn connections_accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Close every open connection; the listener keeps accepting
    pub fn drop_connections(&self) {
        self.drop_tx.send_modify(|generation| *generation += 1);
    }

    /// Wait until at least `n` requests were received
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for_requests(&self, n: usize, timeout: Duration) -> bool {
        let poll = async {
            while self.state.received.lock().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

impl Drop for ProgrammableServer {
    fn drop(&mut self) {
        self.drop_connections();
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ProgramState>, drop_rx: watch::Receiver<u64>) {
    while let Ok((stream, peer)) = listener.accept().await {
        state.accepted.fetch_add(1, Ordering::SeqCst);
        debug!(%peer, "Programmable server accepted connection");
        tokio::spawn(serve(stream, Arc::clone(&state), drop_rx.clone()));
    }
}

async fn serve(stream: TcpStream, state: Arc<ProgramState>, mut drop_rx: watch::Receiver<u64>) {
    drop_rx.borrow_and_update();
    let (mut reader, mut writer) = stream.into_split();

    loop {
        tokio::select! {
            frame = read_frame::<_, RequestEnvelope>(&mut reader, DEFAULT_MAX_FRAME_SIZE) => {
                let Ok(Some(envelope)) = frame else { break };
                let request_id = envelope.request_id;
                if let Request::Commit(commit) = &envelope.request {
                    debug!(request_id = %request_id, start_ts = %commit.start_timestamp, "Programmable server got commit");
                }
                state.received.lock().push(envelope);

                let next = state.responses.lock().pop_front();
                if let Some(response) = next {
                    let reply = ResponseEnvelope::new(request_id, response);
                    if write_frame(&mut writer, &reply, DEFAULT_MAX_FRAME_SIZE).await.is_err() {
                        break;
                    }
                }
            }
            _ = drop_rx.changed() => break,
        }
    }
}
