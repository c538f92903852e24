//! Realtime fanout.
//!
//! After a mutation commits, the server hands a [`FanoutJob`] to
//! [`Fanout::notify`]. A background worker resolves the conversation's
//! active participants from a fresh snapshot and pushes the event to
//! every live connection of each participant.
//!
//! Delivery is advisory:
//! - at most once, with no backlog for offline users
//! - never before the triggering commit is visible to snapshots
//! - dropped, with a warning, when the job queue is full
//!
//! Clients that miss an event catch up through the dirty-sync feeds.

use chatsync_core::{Database, ReadView, RowId};
use chatsync_protocol::PushEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

type Outbound = mpsc::UnboundedSender<PushEvent>;

/// Live connections, addressed by user.
///
/// A user may hold several connections (one per device); each receives
/// its own copy of every event addressed to the user.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: RwLock<HashMap<Uuid, HashMap<u64, Outbound>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `user`.
    ///
    /// The connection stays registered until the returned handle is
    /// dropped.
    pub fn register(self: &Arc<Self>, user: Uuid) -> Connection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections
            .write()
            .entry(user)
            .or_default()
            .insert(id, sender);
        tracing::info!(%user, connection = id, "connection registered");
        Connection {
            user,
            id,
            receiver,
            registry: Arc::downgrade(self),
        }
    }

    /// Sends `event` to every live connection of `user`.
    ///
    /// Returns the number of connections reached. Connections whose
    /// receiving end is gone are pruned.
    pub fn deliver(&self, user: Uuid, event: &PushEvent) -> usize {
        let mut connections = self.connections.write();
        let Some(senders) = connections.get_mut(&user) else {
            return 0;
        };
        senders.retain(|_, sender| sender.send(event.clone()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            connections.remove(&user);
        }
        delivered
    }

    /// Returns true if `user` has at least one live connection.
    pub fn is_connected(&self, user: Uuid) -> bool {
        self.connections.read().contains_key(&user)
    }

    /// Total number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().values().map(HashMap::len).sum()
    }

    fn unregister(&self, user: Uuid, id: u64) {
        let mut connections = self.connections.write();
        if let Some(senders) = connections.get_mut(&user) {
            senders.remove(&id);
            if senders.is_empty() {
                connections.remove(&user);
            }
        }
        tracing::info!(%user, connection = id, "connection closed");
    }
}

/// The receiving end of one client connection.
#[derive(Debug)]
pub struct Connection {
    user: Uuid,
    id: u64,
    receiver: mpsc::UnboundedReceiver<PushEvent>,
    registry: Weak<ConnectionRegistry>,
}

impl Connection {
    /// The connected user.
    pub fn user(&self) -> Uuid {
        self.user
    }

    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.user, self.id);
        }
    }
}

/// An event to push to a conversation's participants.
#[derive(Debug, Clone)]
pub struct FanoutJob {
    /// Conversation whose active participants receive the event.
    pub conversation: RowId,
    /// The event.
    pub event: PushEvent,
    /// Users to notify besides the active participants.
    pub also: Vec<Uuid>,
}

impl FanoutJob {
    /// Creates a job addressed to a conversation's active participants.
    pub fn new(conversation: RowId, event: PushEvent) -> Self {
        Self {
            conversation,
            event,
            also: Vec::new(),
        }
    }

    /// Also notifies `user`, e.g. a member who was just removed.
    pub fn also_notify(mut self, user: Uuid) -> Self {
        self.also.push(user);
        self
    }
}

/// Handle for enqueueing fanout jobs.
#[derive(Debug, Clone)]
pub struct Fanout {
    sender: mpsc::Sender<FanoutJob>,
}

impl Fanout {
    /// Creates a handle and the queue it feeds.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FanoutJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Starts the delivery worker on the current tokio runtime.
    pub fn spawn(
        db: Arc<Database>,
        registry: Arc<ConnectionRegistry>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (fanout, jobs) = Self::channel(capacity);
        let worker = tokio::spawn(run_worker(db, registry, jobs));
        (fanout, worker)
    }

    /// Enqueues a job without waiting.
    ///
    /// Returns false if the job was dropped because the queue is full or
    /// the worker has stopped.
    pub fn notify(&self, job: FanoutJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                tracing::warn!(event = job.event.name(), "fanout queue full; event dropped");
                false
            }
            Err(TrySendError::Closed(job)) => {
                tracing::warn!(event = job.event.name(), "fanout worker stopped; event dropped");
                false
            }
        }
    }
}

async fn run_worker(
    db: Arc<Database>,
    registry: Arc<ConnectionRegistry>,
    mut jobs: mpsc::Receiver<FanoutJob>,
) {
    while let Some(job) = jobs.recv().await {
        deliver_job(&db, &registry, job);
    }
    tracing::debug!("fanout worker stopped");
}

/// Delivers one job synchronously. Returns the number of connections reached.
///
/// Conversation rows are stamped with each recipient's effective version
/// so a pushed row matches the recipient's conversation feed.
pub fn deliver_job(db: &Database, registry: &ConnectionRegistry, job: FanoutJob) -> usize {
    let events: Vec<(Uuid, PushEvent)> = {
        let snapshot = db.snapshot();
        let mut recipients: Vec<(Uuid, Option<RowId>)> = snapshot
            .active_participants(job.conversation)
            .into_iter()
            .map(|u| (u.uuid, Some(u.id)))
            .collect();
        for user in job.also {
            if !recipients.iter().any(|(uuid, _)| *uuid == user) {
                recipients.push((user, snapshot.user_by_uuid(user).map(|u| u.id)));
            }
        }
        recipients
            .into_iter()
            .map(|(user, row)| {
                let event = job.event.for_recipient(user);
                let event = match row.and_then(|id| snapshot.membership(id, job.conversation)) {
                    Some(membership) => event.at_membership_version(membership.version.as_u64()),
                    None => event,
                };
                (user, event)
            })
            .collect()
    };

    let delivered = events
        .iter()
        .map(|(user, event)| registry.deliver(*user, event))
        .sum();
    tracing::trace!(
        event = job.event.name(),
        version = job.event.version(),
        recipients = events.len(),
        delivered,
        "event fanned out"
    );
    delivered
}
