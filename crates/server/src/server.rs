//! TCP front end of the commit decision engine
//!
//! Each connection gets a reader loop and a writer task. Requests are decided
//! on the blocking pool (a reservation may fsync) and their responses queued
//! to the writer as they complete, so responses may leave out of order.
//!
//! A commit record reaches `Replied` only after its response frame was
//! written; listeners therefore never hear about a commit whose response was
//! lost in this process. A failed write does not undo the decision.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::notify::ObserverRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tso_concurrency::{CommitError, CommitManager, CommitRecord, TimestampOracle};
use tso_core::{Request, RequestEnvelope, RequestId, Response, ResponseEnvelope, Timestamp};
use tso_durability::TimestampLog;
use tso_wire::{read_frame, write_frame};

struct Shared {
    manager: Arc<CommitManager>,
    max_frame_size: usize,
    halt: watch::Sender<Option<CommitError>>,
}

impl Shared {
    fn fail(&self, request_id: RequestId, e: CommitError) {
        if e.is_fatal() {
            error!(request_id = %request_id, error = %e, "Fatal commit path failure, halting server");
            self.halt.send_replace(Some(e));
        } else {
            error!(request_id = %request_id, error = %e, "Request failed");
        }
    }
}

struct Outgoing {
    envelope: ResponseEnvelope,
    record: Option<CommitRecord>,
}

/// Stops a running [`TsoServer`]
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

/// Timestamp oracle server
pub struct TsoServer {
    listener: TcpListener,
    shared: Arc<Shared>,
    observers: Arc<ObserverRegistry>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl TsoServer {
    /// Open the oracle described by `config` and bind its listener
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let oracle = match &config.data_dir {
            Some(dir) => {
                let (oracle, recovery) = TimestampOracle::open(
                    dir,
                    config.effective_durability(),
                    config.reservation_window,
                )?;
                if recovery.had_damage() {
                    warn!(summary = %recovery.summary(), "Timestamp log recovered with damage");
                }
                oracle
            }
            None => {
                warn!("No data_dir configured, timestamps are not durable across restarts");
                TimestampOracle::new(
                    TimestampLog::ephemeral(),
                    Timestamp::ZERO,
                    config.reservation_window,
                )
            }
        };

        let manager = Arc::new(CommitManager::new(oracle, config.manager_options()));
        Self::with_manager(manager, config).await
    }

    /// Serve an existing commit manager
    pub async fn with_manager(
        manager: Arc<CommitManager>,
        config: &ServerConfig,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen_addr()).await?;

        let observers = Arc::new(ObserverRegistry::new());
        manager.add_listener(observers.clone());

        let (halt, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        Ok(TsoServer {
            listener,
            shared: Arc::new(Shared {
                manager,
                max_frame_size: config.max_frame_size,
                halt,
            }),
            observers,
            shutdown: Arc::new(shutdown),
        })
    }

    /// Bound address
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Commit manager behind this server
    pub fn manager(&self) -> Arc<CommitManager> {
        Arc::clone(&self.shared.manager)
    }

    /// Observer interest registry fed by replied commits
    pub fn observers(&self) -> Arc<ObserverRegistry> {
        Arc::clone(&self.observers)
    }

    /// Handle to stop [`run`](Self::run) from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Accept connections until shut down or halted
    ///
    /// # Errors
    ///
    /// [`ServerError::Halted`] once the commit path failed fatally. All
    /// connections are closed first, so clients resolve their outstanding
    /// commits as heuristic.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut halt_rx = self.shared.halt.subscribe();
        info!(addr = %self.local_addr()?, "TSO server listening");

        let result = loop {
            if *shutdown_rx.borrow_and_update() {
                info!("TSO server shutting down");
                break Ok(());
            }
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            Arc::clone(&self.shared),
                            self.shutdown.subscribe(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                _ = shutdown_rx.changed() => {}
                _ = halt_rx.changed() => {
                    let halted = halt_rx.borrow().clone();
                    if let Some(e) = halted {
                        break Err(ServerError::Halted(e));
                    }
                }
            }
        };

        self.shutdown.send_replace(true);
        result
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
    }
    debug!(%peer, "Connection accepted");

    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_responses(writer, rx, Arc::clone(&shared), peer));

    while !*shutdown.borrow() {
        tokio::select! {
            frame = read_frame::<_, RequestEnvelope>(&mut reader, shared.max_frame_size) => match frame {
                Ok(Some(envelope)) => dispatch(envelope, &shared, &tx),
                Ok(None) => {
                    debug!(%peer, "Connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(%peer, error = %e, "Protocol error, closing connection");
                    break;
                }
            },
            _ = shutdown.changed() => {}
        }
    }

    drop(tx);
    if *shutdown.borrow() {
        writer_task.abort();
        debug!(%peer, "Connection closed on shutdown");
    } else if let Err(e) = writer_task.await {
        error!(%peer, error = %e, "Connection writer failed");
    }
}

async fn write_responses(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    shared: Arc<Shared>,
    peer: SocketAddr,
) {
    while let Some(out) = rx.recv().await {
        let request_id = out.envelope.request_id;
        if let Err(e) = write_frame(&mut writer, &out.envelope, shared.max_frame_size).await {
            warn!(%peer, request_id = %request_id, error = %e, "Failed to deliver response, decision stands");
            break;
        }
        if let Some(mut record) = out.record {
            if let Err(e) = shared.manager.replied(&mut record) {
                error!(request_id = %request_id, error = %e, "Failed to mark commit replied");
            }
        }
    }
}

fn dispatch(envelope: RequestEnvelope, shared: &Arc<Shared>, tx: &mpsc::UnboundedSender<Outgoing>) {
    let shared = Arc::clone(shared);
    let tx = tx.clone();
    tokio::spawn(async move {
        let request_id = envelope.request_id;
        let manager = Arc::clone(&shared.manager);
        match tokio::task::spawn_blocking(move || handle_request(&manager, envelope)).await {
            Ok(Ok(out)) => {
                if tx.send(out).is_err() {
                    debug!(request_id = %request_id, "Connection gone before reply, decision stands");
                }
            }
            Ok(Err(e)) => shared.fail(request_id, e),
            Err(e) => error!(request_id = %request_id, error = %e, "Request task failed"),
        }
    });
}

fn handle_request(manager: &CommitManager, envelope: RequestEnvelope) -> Result<Outgoing, CommitError> {
    let RequestEnvelope {
        request_id,
        request,
    } = envelope;

    match request {
        Request::Timestamp => {
            let timestamp = manager.timestamp()?;
            Ok(Outgoing {
                envelope: ResponseEnvelope::new(request_id, Response::Timestamp { timestamp }),
                record: None,
            })
        }
        Request::Commit(commit) => {
            let mut record = manager.receive(request_id, commit);
            let response = manager.decide(&mut record)?;
            let record = record.phase().is_decided().then_some(record);
            Ok(Outgoing {
                envelope: ResponseEnvelope::new(request_id, response),
                record,
            })
        }
    }
}
