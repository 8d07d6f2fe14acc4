//! Pending-request bookkeeping shared by caches and clients
//!
//! Nodes never block on an upward reply. They park the request here with a
//! deadline and keep draining their mailbox; the node loop sleeps until the
//! earliest deadline alongside `recv()`, so an expiry resumes the request
//! just like an incoming message would.

use crate::types::RequestId;
use std::collections::HashMap;
use tokio::time::Instant;

/// Outstanding requests keyed by request id, each guarded by a deadline
#[derive(Debug)]
pub struct PendingTable<R> {
    records: HashMap<RequestId, Tracked<R>>,
}

#[derive(Debug)]
struct Tracked<R> {
    deadline: Instant,
    record: R,
}

impl<R> Default for PendingTable<R> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<R> PendingTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: RequestId, deadline: Instant, record: R) {
        self.records.insert(id, Tracked { deadline, record });
    }

    pub fn get_mut(&mut self, id: &RequestId) -> Option<&mut R> {
        self.records.get_mut(id).map(|tracked| &mut tracked.record)
    }

    pub fn remove(&mut self, id: &RequestId) -> Option<R> {
        self.records.remove(id).map(|tracked| tracked.record)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.records.contains_key(id)
    }

    /// Earliest deadline among outstanding requests
    pub fn next_deadline(&self) -> Option<Instant> {
        self.records.values().map(|tracked| tracked.deadline).min()
    }

    /// Remove and return every request whose deadline is at or before `now`
    pub fn drain_expired(&mut self, now: Instant) -> Vec<(RequestId, R)> {
        let expired: Vec<RequestId> = self
            .records
            .iter()
            .filter(|(_, tracked)| tracked.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.remove(&id).map(|record| (id, record)))
            .collect()
    }

    /// Forget everything without resolving it; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Sleep until `deadline`, or forever when nothing is pending
pub async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_next_deadline_is_earliest() {
        let now = Instant::now();
        let mut table = PendingTable::new();
        table.insert(RequestId::new(), now + Duration::from_millis(300), "late");
        table.insert(RequestId::new(), now + Duration::from_millis(100), "early");

        assert_eq!(table.next_deadline(), Some(now + Duration::from_millis(100)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_drain_expired_only_takes_due_records() {
        let now = Instant::now();
        let mut table = PendingTable::new();
        let due = RequestId::new();
        let later = RequestId::new();
        table.insert(due, now, 1);
        table.insert(later, now + Duration::from_secs(60), 2);

        let expired = table.drain_expired(now);
        assert_eq!(expired, vec![(due, 1)]);
        assert!(table.contains(&later));
        assert!(!table.contains(&due));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut table = PendingTable::new();
        let id = RequestId::new();
        table.insert(id, Instant::now(), "record");

        assert_eq!(table.remove(&id), Some("record"));
        assert_eq!(table.remove(&id), None);

        table.insert(RequestId::new(), Instant::now(), "a");
        table.insert(RequestId::new(), Instant::now(), "b");
        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
        assert_eq!(table.next_deadline(), None);
    }

    #[tokio::test]
    async fn test_wait_until_without_deadline_never_fires() {
        let result = tokio::time::timeout(Duration::from_millis(20), wait_until(None)).await;
        assert!(result.is_err());

        let deadline = Instant::now() + Duration::from_millis(5);
        let result =
            tokio::time::timeout(Duration::from_millis(500), wait_until(Some(deadline))).await;
        assert!(result.is_ok());
    }
}
