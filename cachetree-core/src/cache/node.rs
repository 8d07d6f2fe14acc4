//! Cache node state machine shared by far (L1) and near (L2) caches
//!
//! Both levels run the same code. The only differences are who the
//! upstream peer is (the store for a far cache, a far cache for a near
//! cache), who the children are, and which hop timeouts apply.
//!
//! ```text
//! Normal --Crash--> Crashed --Recover--> Normal
//! Normal --Recover--> Normal   (no-op)
//! Crashed --Crash--> Crashed   (no-op)
//! ```

use crate::cache::stats::CacheStats;
use crate::config::{FallbackPolicy, TimeoutTable};
use crate::error::CacheError;
use crate::message::{Control, Inbox, Message, NodeSnapshot, Peer};
use crate::pending::{wait_until, PendingTable};
use crate::types::{Entry, Key, Liveness, NodeId, NodeKind, Operation, RequestId, Value};
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Peers a cache node talks to
#[derive(Debug, Clone)]
pub struct CacheLinks {
    /// Parent: the store for a far cache, a far cache for a near cache
    pub upstream: Peer,

    /// The store itself, target of the fallback path
    pub store: Peer,

    pub children: Vec<Peer>,
}

/// Downstream requester waiting on an upward request
#[derive(Debug, Clone)]
struct Waiter {
    requester: Peer,
    request_id: RequestId,
}

/// Identity of a logical operation for duplicate suppression
///
/// Reads of the same key share one upward request whoever asked. A write
/// is the same operation only when requester, key and value all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InflightKey {
    Read(Key),
    Write {
        requester: NodeId,
        key: Key,
        value: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryState {
    FirstAttempt,
    RetriedViaStore,
}

#[derive(Debug)]
struct UpstreamRequest {
    op: Operation,
    inflight: InflightKey,
    waiters: Vec<Waiter>,
    /// Waiters the current attempt was sent for; later ones joined it in flight
    sent_for: usize,
    retry: RetryState,
}

/// A far or near cache
pub struct CacheNode {
    me: Peer,
    level: NodeKind,
    inbox: Inbox,
    links: CacheLinks,
    timeouts: TimeoutTable,
    policy: FallbackPolicy,
    liveness: Liveness,
    table: HashMap<Key, Entry>,
    pending: PendingTable<UpstreamRequest>,
    inflight: HashMap<InflightKey, RequestId>,
    stats: CacheStats,
}

impl CacheNode {
    pub fn new(
        me: Peer,
        inbox: Inbox,
        level: NodeKind,
        links: CacheLinks,
        timeouts: TimeoutTable,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            me,
            level,
            inbox,
            links,
            timeouts,
            policy,
            liveness: Liveness::Normal,
            table: HashMap::new(),
            pending: PendingTable::new(),
            inflight: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn id(&self) -> &NodeId {
        self.me.id()
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    /// Process the mailbox until shutdown
    pub async fn run(mut self) {
        info!(
            "{} {} started (upstream: {}, children: {})",
            self.level,
            self.id(),
            self.links.upstream.id(),
            self.links.children.len()
        );

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

        debug!("{} stopped", self.id());
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Control(control) => self.on_control(control),
            message if self.liveness.is_crashed() => {
                self.stats.dropped_while_crashed += 1;
                debug!("{} is crashed, dropping {}", self.id(), message.name());
            }
            Message::ReadRequest {
                key,
                requester,
                request_id,
            } => self.on_read_request(key, requester, request_id),
            Message::WriteRequest {
                key,
                value,
                requester,
                request_id,
            } => self.on_write_request(key, value, requester, request_id),
            Message::ReadConfirmation { entry, request_id }
            | Message::WriteConfirmation { entry, request_id } => {
                self.on_confirmation(entry, request_id)
            }
            Message::RequestFailed { request_id, error } => self.on_failure(request_id, error),
            Message::UpdatePush(entry) => self.on_update_push(entry),
            Message::Command(_) => {
                warn!("{} does not accept local commands", self.id());
            }
        }
    }

    fn on_read_request(&mut self, key: Key, requester: Peer, request_id: RequestId) {
        if let Some(entry) = self.table.get(&key).copied() {
            self.stats.hits += 1;
            debug!("{} hit: {} for {}", self.id(), entry, requester.id());
            requester.send(Message::ReadConfirmation { entry, request_id });
            return;
        }

        self.stats.misses += 1;
        debug!("{} miss: key {} for {}", self.id(), key, requester.id());
        self.forward_or_join(
            Operation::Read { key },
            InflightKey::Read(key),
            Waiter {
                requester,
                request_id,
            },
        );
    }

    fn on_write_request(&mut self, key: Key, value: Value, requester: Peer, request_id: RequestId) {
        debug!("{} write {}={} from {}", self.id(), key, value, requester.id());
        let inflight = InflightKey::Write {
            requester: requester.id().clone(),
            key,
            value,
        };
        // No optimistic local write: the store assigns the version
        self.forward_or_join(
            Operation::Write { key, value },
            inflight,
            Waiter {
                requester,
                request_id,
            },
        );
    }

    fn forward_or_join(&mut self, op: Operation, inflight: InflightKey, waiter: Waiter) {
        let existing = self
            .inflight
            .get(&inflight)
            .and_then(|id| self.pending.get_mut(id));

        if let Some(record) = existing {
            record.waiters.push(waiter);
            self.stats.coalesced += 1;
            debug!(
                "{} joined in-flight {} for key {}",
                self.me.id(),
                op.kind(),
                op.key()
            );
            return;
        }

        let record = UpstreamRequest {
            op,
            inflight,
            waiters: vec![waiter],
            sent_for: 0,
            retry: RetryState::FirstAttempt,
        };
        let upstream = self.links.upstream.clone();
        self.dispatch(record, &upstream);
    }

    /// Send the request to `target` under a fresh id and arm its deadline
    fn dispatch(&mut self, mut record: UpstreamRequest, target: &Peer) {
        let upstream_id = RequestId::new();
        let timeout = self.timeouts.for_hop(self.level, record.op.kind());

        debug!(
            "{} forwarding {} for key {} to {} as {} (timeout {:?})",
            self.id(),
            record.op.kind(),
            record.op.key(),
            target.id(),
            upstream_id,
            timeout
        );

        target.send(Message::request(record.op, self.me.clone(), upstream_id));
        record.sent_for = record.waiters.len();
        self.stats.forwarded += 1;
        self.inflight.insert(record.inflight.clone(), upstream_id);
        self.pending.insert(upstream_id, Instant::now() + timeout, record);
    }

    fn take_pending(&mut self, request_id: &RequestId) -> Option<UpstreamRequest> {
        let record = self.pending.remove(request_id)?;
        self.release_inflight(&record, request_id);
        Some(record)
    }

    fn release_inflight(&mut self, record: &UpstreamRequest, request_id: &RequestId) {
        if self.inflight.get(&record.inflight) == Some(request_id) {
            self.inflight.remove(&record.inflight);
        }
    }

    fn on_confirmation(&mut self, entry: Entry, request_id: RequestId) {
        let Some(record) = self.take_pending(&request_id) else {
            debug!(
                "{} ignoring confirmation for unknown request {}",
                self.id(),
                request_id
            );
            return;
        };
        self.stats.confirmations += 1;

        if entry.key != record.op.key() {
            warn!(
                "{} got {} in answer to a {} for key {}",
                self.id(),
                entry,
                record.op.kind(),
                record.op.key()
            );
            let error = CacheError::ProtocolViolation(format!(
                "confirmation for key {} answered request for key {}",
                entry.key,
                record.op.key()
            ));
            self.fail_waiters(record, error);
            return;
        }

        let applied = self.apply(entry);

        // Downstream sees the upstream value unmodified
        for waiter in &record.waiters {
            waiter
                .requester
                .send(Message::confirmation(&record.op, entry, waiter.request_id));
        }

        if matches!(record.op, Operation::Write { .. }) && applied {
            let origins: HashSet<&NodeId> =
                record.waiters.iter().map(|w| w.requester.id()).collect();
            self.fan_out(entry, &origins);
        }
    }

    fn on_update_push(&mut self, entry: Entry) {
        if self.apply(entry) {
            self.stats.pushes_applied += 1;
            debug!("{} applied pushed {}", self.id(), entry);
            self.fan_out(entry, &HashSet::new());
        } else {
            self.stats.pushes_discarded += 1;
            debug!("{} discarded pushed {} (not newer)", self.id(), entry);
        }
    }

    fn on_failure(&mut self, request_id: RequestId, error: CacheError) {
        let Some(record) = self.take_pending(&request_id) else {
            debug!("{} ignoring failure for unknown request {}", self.id(), request_id);
            return;
        };

        if error.is_timeout() {
            self.on_upstream_timeout(record);
        } else {
            self.fail_waiters(record, error);
        }
    }

    fn expire(&mut self, now: Instant) {
        for (request_id, record) in self.pending.drain_expired(now) {
            self.release_inflight(&record, &request_id);
            warn!(
                "{} {} for key {} timed out waiting on upstream ({})",
                self.id(),
                record.op.kind(),
                record.op.key(),
                request_id
            );
            self.on_upstream_timeout(record);
        }
    }

    fn on_upstream_timeout(&mut self, mut record: UpstreamRequest) {
        self.stats.timeouts += 1;

        let can_bypass = self.policy == FallbackPolicy::RetryViaStore
            && record.retry == RetryState::FirstAttempt
            && self.links.upstream.id() != self.links.store.id();

        if can_bypass {
            info!(
                "{} retrying {} for key {} directly at the store",
                self.id(),
                record.op.kind(),
                record.op.key()
            );
            record.retry = RetryState::RetriedViaStore;
            self.stats.retries += 1;
            let store = self.links.store.clone();
            self.dispatch(record, &store);
            return;
        }

        // Joiners never had a request of their own; the path may have
        // recovered since the attempt went out
        let joined = record.waiters.split_off(record.sent_for);
        let (op, inflight) = (record.op, record.inflight.clone());

        let kind = op.kind();
        let error = CacheError::RequestTimedOut {
            kind,
            key: op.key(),
            timeout_ms: self.timeouts.for_hop(self.level, kind).as_millis() as u64,
        };
        self.fail_waiters(record, error);

        if !joined.is_empty() {
            debug!(
                "{} re-sending {} for key {} on behalf of {} late waiters",
                self.id(),
                kind,
                op.key(),
                joined.len()
            );
            let upstream = self.links.upstream.clone();
            self.dispatch(
                UpstreamRequest {
                    op,
                    inflight,
                    waiters: joined,
                    sent_for: 0,
                    retry: RetryState::FirstAttempt,
                },
                &upstream,
            );
        }
    }

    fn fail_waiters(&mut self, record: UpstreamRequest, error: CacheError) {
        for waiter in record.waiters {
            waiter.requester.send(Message::RequestFailed {
                request_id: waiter.request_id,
                error: error.clone(),
            });
            self.stats.failures_propagated += 1;
        }
    }

    /// Replace the local entry if `entry` is newer; never regresses a version
    fn apply(&mut self, entry: Entry) -> bool {
        if entry.is_newer_than(self.table.get(&entry.key)) {
            self.table.insert(entry.key, entry);
            true
        } else {
            false
        }
    }

    fn fan_out(&mut self, entry: Entry, skip: &HashSet<&NodeId>) {
        for child in &self.links.children {
            if skip.contains(child.id()) {
                continue;
            }
            child.send(Message::UpdatePush(entry));
            self.stats.pushes_sent += 1;
        }
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::Crash => self.crash(),
            Control::Recover => self.recover(),
            Control::Dump(respond) => {
                let _ = respond.send(self.snapshot());
            }
            Control::Clear => {
                let count = self.table.len();
                self.table.clear();
                info!("{} cleared {} entries", self.id(), count);
            }
            Control::Stats(respond) => {
                let _ = respond.send(self.stats());
            }
            Control::Liveness(respond) => {
                let _ = respond.send(self.liveness);
            }
            // Handled by the run loop
            Control::Shutdown => {}
        }
    }

    fn crash(&mut self) {
        if self.liveness.is_crashed() {
            debug!("{} already crashed", self.id());
            return;
        }

        self.liveness = Liveness::Crashed;
        let entries = self.table.len();
        self.table.clear();
        // Requesters observe the silence through their own timers
        let abandoned = self.pending.clear();
        self.inflight.clear();
        self.stats.crashes += 1;

        info!(
            "{} crashed: dropped {} entries and {} pending requests",
            self.id(),
            entries,
            abandoned
        );
    }

    fn recover(&mut self) {
        if !self.liveness.is_crashed() {
            debug!("{} is not crashed, recover is a no-op", self.id());
            return;
        }

        self.liveness = Liveness::Normal;
        self.stats.recoveries += 1;
        info!("{} recovered with an empty table", self.id());
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot::new(
            self.id().clone(),
            self.level,
            self.liveness,
            self.table.values().copied(),
            self.pending.len(),
        )
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.table.len(),
            ..self.stats.clone()
        }
    }
}
