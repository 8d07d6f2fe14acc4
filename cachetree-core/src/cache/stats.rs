//! Per-node counters for observing protocol behaviour

use serde::{Deserialize, Serialize};
use std::fmt;

/// Statistics collected by a node
///
/// Cache nodes fill every field. The store reports reads it answered as
/// `hits`, reads of unknown keys as `misses`, confirmed writes as
/// `confirmations` and updates it fanned out as `pushes_sent`. Clients
/// count requests sent as `forwarded`, answered requests as
/// `confirmations` and failed ones as `timeouts` or `failures_propagated`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from the local table
    pub hits: u64,

    /// Reads that had to go upward
    pub misses: u64,

    /// Requests forwarded upward (including retries)
    pub forwarded: u64,

    /// Reads coalesced onto an in-flight upward read
    pub coalesced: u64,

    /// Upward confirmations received
    pub confirmations: u64,

    /// Pushed updates that replaced a local entry
    pub pushes_applied: u64,

    /// Pushed updates dropped as not newer
    pub pushes_discarded: u64,

    /// Updates sent to children
    pub pushes_sent: u64,

    /// Upward requests whose deadline elapsed
    pub timeouts: u64,

    /// Requests re-issued through the fallback path
    pub retries: u64,

    /// Failures sent to downstream requesters
    pub failures_propagated: u64,

    /// Messages dropped because the node was crashed
    pub dropped_while_crashed: u64,

    pub crashes: u64,

    pub recoveries: u64,

    /// Entries currently held
    pub entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Fold another node's counters into this one
    pub fn merge(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.forwarded += other.forwarded;
        self.coalesced += other.coalesced;
        self.confirmations += other.confirmations;
        self.pushes_applied += other.pushes_applied;
        self.pushes_discarded += other.pushes_discarded;
        self.pushes_sent += other.pushes_sent;
        self.timeouts += other.timeouts;
        self.retries += other.retries;
        self.failures_propagated += other.failures_propagated;
        self.dropped_while_crashed += other.dropped_while_crashed;
        self.crashes += other.crashes;
        self.recoveries += other.recoveries;
        self.entries += other.entries;
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, \
             forwarded: {}, timeouts: {}, retries: {}, crashes: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.forwarded,
            self.timeouts,
            self.retries,
            self.crashes
        )
    }
}
