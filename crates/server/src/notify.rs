//! Observer interest registry
//!
//! Observers register interest in a column (table, family, qualifier) and
//! receive a [`Notification`] for every replied commit that wrote a cell of
//! that column. Delivery goes through an unbounded channel per registration
//! and is best effort: a closed receiver is dropped on the next commit that
//! would have reached it.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use tso_concurrency::{CommitEvent, CommitListener};
use tso_core::{CellId, Timestamp};

/// A column an observer watches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interest {
    /// Table identifier
    pub table: Vec<u8>,
    /// Column family
    pub column_family: Vec<u8>,
    /// Column qualifier
    pub column: Vec<u8>,
}

impl Interest {
    /// Interest in `table`/`column_family`:`column`
    pub fn new(
        table: impl Into<Vec<u8>>,
        column_family: impl Into<Vec<u8>>,
        column: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            table: table.into(),
            column_family: column_family.into(),
            column: column.into(),
        }
    }

    /// The column `cell` belongs to
    pub fn of(cell: &CellId) -> Self {
        Self {
            table: cell.table.clone(),
            column_family: cell.family.clone(),
            column: cell.qualifier.clone(),
        }
    }
}

/// A committed write to a watched column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Observer the notification is addressed to
    pub observer: String,
    /// Cell that was written
    pub cell: CellId,
    /// Start timestamp of the writing transaction
    pub start_timestamp: Timestamp,
    /// Commit timestamp of the writing transaction
    pub commit_timestamp: Timestamp,
}

struct Subscriber {
    observer: String,
    sender: mpsc::UnboundedSender<Notification>,
}

/// Registry of observer interests
///
/// Registered with a commit manager as a [`CommitListener`].
#[derive(Default)]
pub struct ObserverRegistry {
    interests: DashMap<Interest, Vec<Subscriber>>,
    delivered: AtomicU64,
}

impl ObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` for `interest`
    ///
    /// A repeated registration replaces the previous channel.
    pub fn register_interest(
        &self,
        observer: impl Into<String>,
        interest: Interest,
    ) -> mpsc::UnboundedReceiver<Notification> {
        let observer = observer.into();
        let (sender, receiver) = mpsc::unbounded_channel();

        debug!(observer = %observer, interest = ?interest, "Registered observer interest");
        let mut subscribers = self.interests.entry(interest).or_default();
        subscribers.retain(|s| s.observer != observer);
        subscribers.push(Subscriber { observer, sender });
        receiver
    }

    /// Remove the registration of `observer` for `interest`
    ///
    /// Returns `false` if there was none.
    pub fn deregister_interest(&self, observer: &str, interest: &Interest) -> bool {
        let removed = match self.interests.get_mut(interest) {
            Some(mut subscribers) => {
                let before = subscribers.len();
                subscribers.retain(|s| s.observer != observer);
                before != subscribers.len()
            }
            None => false,
        };
        self.interests.remove_if(interest, |_, subscribers| subscribers.is_empty());
        if removed {
            debug!(observer = %observer, interest = ?interest, "Deregistered observer interest");
        }
        removed
    }

    /// Number of live registrations
    pub fn registrations(&self) -> usize {
        self.interests.iter().map(|entry| entry.value().len()).sum()
    }

    /// Notifications handed to channels so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl CommitListener for ObserverRegistry {
    fn on_commit(&self, event: &CommitEvent<'_>) {
        if self.interests.is_empty() {
            return;
        }
        for cell in event.write_set {
            let Some(mut subscribers) = self.interests.get_mut(&Interest::of(cell)) else {
                continue;
            };
            subscribers.retain(|s| {
                let notification = Notification {
                    observer: s.observer.clone(),
                    cell: cell.clone(),
                    start_timestamp: event.start_timestamp,
                    commit_timestamp: event.commit_timestamp,
                };
                match s.sender.send(notification) {
                    Ok(()) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                        true
                    }
                    Err(_) => {
                        trace!(observer = %s.observer, "Observer channel closed, dropping registration");
                        false
                    }
                }
            });
        }
    }
}
