//! Messages exchanged between nodes and the addresses they are sent to

use crate::cache::CacheStats;
use crate::error::{CacheError, Result};
use crate::types::{Entry, Key, Liveness, NodeId, NodeKind, Operation, RequestId, Value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Sending half of a node's private mailbox
pub type Mailbox = mpsc::UnboundedSender<Message>;

/// Receiving half of a node's private mailbox
pub type Inbox = mpsc::UnboundedReceiver<Message>;

/// Identity plus mailbox of a node
///
/// Requests carry the requester as a `Peer` so the receiver knows where to
/// send the confirmation without consulting any shared directory.
#[derive(Debug, Clone)]
pub struct Peer {
    id: NodeId,
    mailbox: Mailbox,
}

impl Peer {
    pub fn new(id: NodeId, mailbox: Mailbox) -> Self {
        Self { id, mailbox }
    }

    /// Create a fresh mailbox for `id`
    pub fn channel(id: NodeId) -> (Self, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// One-way send; returns false if the node is gone
    pub fn send(&self, message: Message) -> bool {
        if self.mailbox.send(message).is_err() {
            debug!("Mailbox of {} is closed, message dropped", self.id);
            return false;
        }
        true
    }

    /// Send a message carrying a reply channel and wait for the answer
    pub async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        if !self.send(make(tx)) {
            return Err(CacheError::NodeUnavailable(self.id.clone()));
        }
        rx.await
            .map_err(|_| CacheError::NodeUnavailable(self.id.clone()))
    }
}

/// Everything a node's mailbox can hold
#[derive(Debug)]
pub enum Message {
    ReadRequest {
        key: Key,
        requester: Peer,
        request_id: RequestId,
    },
    WriteRequest {
        key: Key,
        value: Value,
        requester: Peer,
        request_id: RequestId,
    },
    ReadConfirmation {
        entry: Entry,
        request_id: RequestId,
    },
    WriteConfirmation {
        entry: Entry,
        request_id: RequestId,
    },
    /// Data-plane failure travelling back down the request path
    RequestFailed {
        request_id: RequestId,
        error: CacheError,
    },
    /// Fresher entry fanned out after a confirmed write
    UpdatePush(Entry),
    /// Local API call answered through a oneshot (store and client handles)
    Command(Command),
    Control(Control),
}

impl Message {
    /// Upward request message for an operation
    pub fn request(op: Operation, requester: Peer, request_id: RequestId) -> Self {
        match op {
            Operation::Read { key } => Message::ReadRequest {
                key,
                requester,
                request_id,
            },
            Operation::Write { key, value } => Message::WriteRequest {
                key,
                value,
                requester,
                request_id,
            },
        }
    }

    /// Downward confirmation message matching an operation's kind
    pub fn confirmation(op: &Operation, entry: Entry, request_id: RequestId) -> Self {
        match op {
            Operation::Read { .. } => Message::ReadConfirmation { entry, request_id },
            Operation::Write { .. } => Message::WriteConfirmation { entry, request_id },
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Message::ReadRequest { .. } => "ReadRequest",
            Message::WriteRequest { .. } => "WriteRequest",
            Message::ReadConfirmation { .. } => "ReadConfirmation",
            Message::WriteConfirmation { .. } => "WriteConfirmation",
            Message::RequestFailed { .. } => "RequestFailed",
            Message::UpdatePush(_) => "UpdatePush",
            Message::Command(_) => "Command",
            Message::Control(_) => "Control",
        }
    }
}

#[derive(Debug)]
pub enum Command {
    Read {
        key: Key,
        respond: oneshot::Sender<Result<Entry>>,
    },
    Write {
        key: Key,
        value: Value,
        respond: oneshot::Sender<Result<Entry>>,
    },
}

/// Control-plane messages; answered in every liveness state
#[derive(Debug)]
pub enum Control {
    Crash,
    Recover,
    Dump(oneshot::Sender<NodeSnapshot>),
    Clear,
    Stats(oneshot::Sender<CacheStats>),
    Liveness(oneshot::Sender<Liveness>),
    Shutdown,
}

/// Point-in-time view of a node's table
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub liveness: Liveness,
    /// Entries sorted by key
    pub entries: Vec<Entry>,
    /// Outstanding upward requests
    pub pending: usize,
    pub taken_at: DateTime<Utc>,
}

impl NodeSnapshot {
    pub fn new(
        id: NodeId,
        kind: NodeKind,
        liveness: Liveness,
        entries: impl IntoIterator<Item = Entry>,
        pending: usize,
    ) -> Self {
        let mut entries: Vec<Entry> = entries.into_iter().collect();
        entries.sort_by_key(|entry| entry.key);
        Self {
            id,
            kind,
            liveness,
            entries,
            pending,
            taken_at: Utc::now(),
        }
    }

    pub fn get(&self, key: Key) -> Option<&Entry> {
        self.entries
            .binary_search_by_key(&key, |entry| entry.key)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ask_reports_closed_mailbox() {
        let (peer, inbox) = Peer::channel(NodeId::far_cache(0));
        drop(inbox);

        let result = peer.ask(|tx| Message::Control(Control::Liveness(tx))).await;
        assert_eq!(result.unwrap_err(), CacheError::NodeUnavailable(NodeId::far_cache(0)));
    }

    #[tokio::test]
    async fn test_ask_round_trip() {
        let (peer, mut inbox) = Peer::channel(NodeId::near_cache(1));

        tokio::spawn(async move {
            if let Some(Message::Control(Control::Liveness(tx))) = inbox.recv().await {
                let _ = tx.send(Liveness::Crashed);
            }
        });

        let liveness = peer
            .ask(|tx| Message::Control(Control::Liveness(tx)))
            .await
            .unwrap();
        assert_eq!(liveness, Liveness::Crashed);
    }

    #[test]
    fn test_request_and_confirmation_shapes() {
        let (peer, _inbox) = Peer::channel(NodeId::client(0));
        let id = RequestId::new();

        let msg = Message::request(Operation::Write { key: 5, value: 77 }, peer, id);
        assert!(matches!(msg, Message::WriteRequest { key: 5, value: 77, .. }));

        let confirmation =
            Message::confirmation(&Operation::Read { key: 5 }, Entry::new(5, 10, 1), id);
        assert_eq!(confirmation.name(), "ReadConfirmation");
    }

    #[test]
    fn test_snapshot_sorted_lookup() {
        let snapshot = NodeSnapshot::new(
            NodeId::far_cache(0),
            NodeKind::FarCache,
            Liveness::Normal,
            vec![Entry::new(7, 1, 1), Entry::new(2, 5, 3)],
            0,
        );

        assert_eq!(snapshot.entries[0].key, 2);
        assert_eq!(snapshot.get(7).map(|e| e.value), Some(1));
        assert!(snapshot.get(3).is_none());
    }
}
