//! Clients issue reads and writes to their near cache
//!
//! A client never retries. Each call arms its own deadline and resolves
//! with the confirmation, the propagated failure, or `RequestTimedOut`.

use crate::cache::CacheStats;
use crate::config::TimeoutTable;
use crate::error::{CacheError, Result};
use crate::message::{Command, Control, Inbox, Message, NodeSnapshot, Peer};
use crate::pending::{wait_until, PendingTable};
use crate::types::{Entry, Key, Liveness, NodeId, NodeKind, Operation, RequestId, Value};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ClientRequest {
    op: Operation,
    respond: oneshot::Sender<Result<Entry>>,
}

/// Client actor attached to one near cache
pub struct ClientNode {
    me: Peer,
    inbox: Inbox,
    near_cache: Peer,
    timeouts: TimeoutTable,
    pending: PendingTable<ClientRequest>,
    stats: CacheStats,
}

impl ClientNode {
    pub fn new(me: Peer, inbox: Inbox, near_cache: Peer, timeouts: TimeoutTable) -> Self {
        Self {
            me,
            inbox,
            near_cache,
            timeouts,
            pending: PendingTable::new(),
            stats: CacheStats::default(),
        }
    }

    pub async fn run(mut self) {
        info!("{} started, attached to {}", self.me.id(), self.near_cache.id());

        loop {
            let next_deadline = self.pending.next_deadline();

            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(Message::Control(Control::Shutdown)) | None => break,
                    Some(message) => self.handle(message),
                },
                _ = wait_until(next_deadline) => self.expire(Instant::now()),
            }
        }

        debug!("{} stopped", self.me.id());
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Command(Command::Read { key, respond }) => {
                self.issue(Operation::Read { key }, respond)
            }
            Message::Command(Command::Write {
                key,
                value,
                respond,
            }) => self.issue(Operation::Write { key, value }, respond),
            Message::ReadConfirmation { entry, request_id }
            | Message::WriteConfirmation { entry, request_id } => {
                self.on_confirmation(entry, request_id)
            }
            Message::RequestFailed { request_id, error } => {
                let Some(request) = self.pending.remove(&request_id) else {
                    debug!("{} ignoring late failure for {}", self.me.id(), request_id);
                    return;
                };
                self.stats.failures_propagated += 1;
                debug!("{} request {} failed: {}", self.me.id(), request_id, error);
                let _ = request.respond.send(Err(error));
            }
            Message::UpdatePush(entry) => {
                debug!("{} ignoring pushed {}", self.me.id(), entry);
            }
            Message::Control(control) => self.on_control(control),
            other => warn!("{} ignoring unexpected {}", self.me.id(), other.name()),
        }
    }

    fn issue(&mut self, op: Operation, respond: oneshot::Sender<Result<Entry>>) {
        let request_id = RequestId::new();
        let timeout = self.timeouts.for_request(op.kind());

        if !self
            .near_cache
            .send(Message::request(op, self.me.clone(), request_id))
        {
            let _ = respond.send(Err(CacheError::NodeUnavailable(
                self.near_cache.id().clone(),
            )));
            return;
        }

        debug!(
            "{} sent {} for key {} as {}",
            self.me.id(),
            op.kind(),
            op.key(),
            request_id
        );
        self.stats.forwarded += 1;
        self.pending
            .insert(request_id, Instant::now() + timeout, ClientRequest { op, respond });
    }

    fn on_confirmation(&mut self, entry: Entry, request_id: RequestId) {
        let Some(request) = self.pending.remove(&request_id) else {
            debug!("{} ignoring late confirmation for {}", self.me.id(), request_id);
            return;
        };

        let echoed = match request.op {
            Operation::Read { key } => entry.key == key,
            Operation::Write { key, value } => entry.key == key && entry.value == value,
        };

        if !echoed {
            warn!(
                "{} got {} in answer to {:?}",
                self.me.id(),
                entry,
                request.op
            );
            let _ = request.respond.send(Err(CacheError::ProtocolViolation(format!(
                "confirmation {} does not match {:?}",
                entry, request.op
            ))));
            return;
        }

        self.stats.confirmations += 1;
        let _ = request.respond.send(Ok(entry));
    }

    fn expire(&mut self, now: Instant) {
        for (request_id, request) in self.pending.drain_expired(now) {
            let kind = request.op.kind();
            let timeout = self.timeouts.for_request(kind);
            warn!(
                "{} {} for key {} timed out after {:?} ({})",
                self.me.id(),
                kind,
                request.op.key(),
                timeout,
                request_id
            );
            self.stats.timeouts += 1;
            let _ = request.respond.send(Err(CacheError::RequestTimedOut {
                kind,
                key: request.op.key(),
                timeout_ms: timeout.as_millis() as u64,
            }));
        }
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::Dump(respond) => {
                let _ = respond.send(NodeSnapshot::new(
                    self.me.id().clone(),
                    NodeKind::Client,
                    Liveness::Normal,
                    Vec::new(),
                    self.pending.len(),
                ));
            }
            Control::Stats(respond) => {
                let _ = respond.send(self.stats.clone());
            }
            Control::Liveness(respond) => {
                let _ = respond.send(Liveness::Normal);
            }
            Control::Crash | Control::Recover => {
                warn!("{} has no crash model, ignoring crash/recover", self.me.id());
            }
            Control::Clear | Control::Shutdown => {}
        }
    }
}

/// Async API of one client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    peer: Peer,
}

impl ClientHandle {
    pub fn new(peer: Peer) -> Self {
        Self { peer }
    }

    pub fn id(&self) -> &NodeId {
        self.peer.id()
    }

    /// Read the current value of `key`
    pub async fn read(&self, key: Key) -> Result<Value> {
        self.read_entry(key).await.map(|entry| entry.value)
    }

    /// Read `key` along with the version the answering node held
    pub async fn read_entry(&self, key: Key) -> Result<Entry> {
        self.peer
            .ask(|respond| Message::Command(Command::Read { key, respond }))
            .await?
    }

    /// Write `value` to `key`; resolves with the entry the store confirmed
    pub async fn write(&self, key: Key, value: Value) -> Result<Entry> {
        self.peer
            .ask(|respond| {
                Message::Command(Command::Write {
                    key,
                    value,
                    respond,
                })
            })
            .await?
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.peer
            .ask(|respond| Message::Control(Control::Stats(respond)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestKind;
    use std::time::Duration;

    fn spawn_client(timeout: Duration) -> (ClientHandle, Inbox) {
        let (peer, inbox) = Peer::channel(NodeId::client(0));
        let (near, near_inbox) = Peer::channel(NodeId::near_cache(0));
        let client = ClientNode::new(
            peer.clone(),
            inbox,
            near,
            TimeoutTable::new(timeout, timeout),
        );
        tokio::spawn(client.run());
        (ClientHandle::new(peer), near_inbox)
    }

    /// Fake near cache answering every request through `answer`
    fn serve(
        mut near: Inbox,
        answer: impl Fn(Operation) -> Option<std::result::Result<Entry, CacheError>>
            + Send
            + 'static,
    ) {
        tokio::spawn(async move {
            while let Some(message) = near.recv().await {
                let (op, requester, request_id) = match message {
                    Message::ReadRequest {
                        key,
                        requester,
                        request_id,
                    } => (Operation::Read { key }, requester, request_id),
                    Message::WriteRequest {
                        key,
                        value,
                        requester,
                        request_id,
                    } => (Operation::Write { key, value }, requester, request_id),
                    _ => continue,
                };
                match answer(op) {
                    Some(Ok(entry)) => {
                        requester.send(Message::confirmation(&op, entry, request_id));
                    }
                    Some(Err(error)) => {
                        requester.send(Message::RequestFailed { request_id, error });
                    }
                    None => {}
                }
            }
        });
    }

    #[tokio::test]
    async fn test_read_and_write_resolve() {
        let (client, near) = spawn_client(Duration::from_secs(5));
        serve(near, |op| match op {
            Operation::Read { key } => Some(Ok(Entry::new(key, 42, 3))),
            Operation::Write { key, value } => Some(Ok(Entry::new(key, value, 4))),
        });

        assert_eq!(client.read(5).await.unwrap(), 42);
        assert_eq!(client.write(5, 77).await.unwrap(), Entry::new(5, 77, 4));

        let stats = client.stats().await.unwrap();
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.confirmations, 2);
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let (client, near) = spawn_client(Duration::from_millis(50));
        serve(near, |_| None);

        let started = Instant::now();
        let err = client.read(1).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::RequestTimedOut {
                kind: RequestKind::Read,
                key: 1,
                timeout_ms: 50
            }
        );
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_propagated_failure_surfaces_verbatim() {
        let (client, near) = spawn_client(Duration::from_secs(5));
        serve(near, |op| Some(Err(CacheError::KeyNotFound { key: op.key() })));

        assert_eq!(client.read(99).await, Err(CacheError::KeyNotFound { key: 99 }));
    }

    #[tokio::test]
    async fn test_write_echo_mismatch_is_a_violation() {
        let (client, near) = spawn_client(Duration::from_secs(5));
        serve(near, |op| Some(Ok(Entry::new(op.key(), 1, 1))));

        assert!(matches!(
            client.write(2, 500).await,
            Err(CacheError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_near_cache_is_unavailable() {
        let (client, near) = spawn_client(Duration::from_secs(5));
        drop(near);

        assert_eq!(
            client.read(0).await,
            Err(CacheError::NodeUnavailable(NodeId::near_cache(0)))
        );
    }
}
