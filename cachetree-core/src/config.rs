//! Configuration for the cache tree
//!
//! The configuration is consumed once at startup: it sizes the topology,
//! seeds the store and fills the timeout table. Nothing here changes for the
//! lifetime of a running system.

use crate::error::{CacheError, Result};
use crate::types::{NodeKind, RequestKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// What a cache hop does when its upward request goes unanswered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Fail every waiting requester with `RequestTimedOut`
    FailFast,
    /// Re-issue once directly to the store, then fail
    #[default]
    RetryViaStore,
}

/// One `{type, value}` timeout record; `value` is in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: u64,
}

impl TimeoutEntry {
    pub fn new(kind: impl Into<String>, value: u64) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }
}

/// Request deadlines by kind, with optional per-hop-level overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutTable {
    read: Duration,
    write: Duration,
    hops: HashMap<(NodeKind, RequestKind), Duration>,
}

impl TimeoutTable {
    pub fn new(read: Duration, write: Duration) -> Self {
        Self {
            read,
            write,
            hops: HashMap::new(),
        }
    }

    /// Build the table from configuration records
    ///
    /// Recognised types: `read`, `write`, `l1_read`, `l1_write`, `l2_read`,
    /// `l2_write`. `read` and `write` are required.
    pub fn from_entries(entries: &[TimeoutEntry]) -> Result<Self> {
        let mut read = None;
        let mut write = None;
        let mut hops = HashMap::new();

        for entry in entries {
            if entry.value == 0 {
                return Err(CacheError::ConfigurationError(format!(
                    "timeout '{}' must be greater than 0",
                    entry.kind
                )));
            }
            let duration = Duration::from_millis(entry.value);

            match entry.kind.as_str() {
                "read" => read = Some(duration),
                "write" => write = Some(duration),
                other => {
                    let key = parse_hop_type(other).ok_or_else(|| {
                        CacheError::ConfigurationError(format!("unknown timeout type '{}'", other))
                    })?;
                    hops.insert(key, duration);
                }
            }
        }

        let read = read.ok_or_else(|| {
            CacheError::ConfigurationError("missing 'read' timeout".to_string())
        })?;
        let write = write.ok_or_else(|| {
            CacheError::ConfigurationError("missing 'write' timeout".to_string())
        })?;

        Ok(Self { read, write, hops })
    }

    /// Override the deadline used by one cache level for one request kind
    pub fn with_hop_override(
        mut self,
        level: NodeKind,
        kind: RequestKind,
        timeout: Duration,
    ) -> Self {
        self.hops.insert((level, kind), timeout);
        self
    }

    /// Fit near-cache hop deadlines inside the client's deadline
    ///
    /// A near cache that retries at the store spends up to two hop timeouts
    /// on one request. Both attempts must end before the client gives up,
    /// otherwise a write the client saw fail could still be committed.
    /// Levels without an override get a third of the client deadline; an
    /// explicit override of half the client deadline or more is rejected.
    pub fn fit_store_retry(mut self) -> Result<Self> {
        for kind in [RequestKind::Read, RequestKind::Write] {
            let client = self.for_request(kind);
            match self.hops.get(&(NodeKind::NearCache, kind)) {
                Some(hop) if *hop * 2 >= client => {
                    return Err(CacheError::ConfigurationError(format!(
                        "l2_{} timeout of {}ms leaves no room for a store retry within the \
                         {}ms client timeout (must be under half)",
                        kind,
                        hop.as_millis(),
                        client.as_millis()
                    )));
                }
                Some(_) => {}
                None => {
                    self.hops
                        .insert((NodeKind::NearCache, kind), client / STORE_RETRY_SHARE);
                }
            }
        }
        Ok(self)
    }

    /// Deadline a client applies to a request
    pub fn for_request(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Read => self.read,
            RequestKind::Write => self.write,
        }
    }

    /// Deadline a cache node at `level` applies to an upward-forwarded request
    pub fn for_hop(&self, level: NodeKind, kind: RequestKind) -> Duration {
        self.hops
            .get(&(level, kind))
            .copied()
            .unwrap_or_else(|| self.for_request(kind))
    }
}

/// Near-cache share of the client deadline when retrying via the store
const STORE_RETRY_SHARE: u32 = 3;

fn parse_hop_type(kind: &str) -> Option<(NodeKind, RequestKind)> {
    let (level, request) = kind.split_once('_')?;
    let level = match level {
        "l1" => NodeKind::FarCache,
        "l2" => NodeKind::NearCache,
        _ => return None,
    };
    let request = match request {
        "read" => RequestKind::Read,
        "write" => RequestKind::Write,
        _ => return None,
    };
    Some((level, request))
}

/// Shape of the cache tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    #[serde(alias = "N_CLIENTS")]
    pub n_clients: usize,

    #[serde(alias = "N_L1_CACHES")]
    pub n_l1_caches: usize,

    #[serde(alias = "N_L2_CACHES")]
    pub n_l2_caches: usize,

    /// Identical fan-out at every level when true
    pub balanced: bool,

    /// Unbalanced only: number of near caches under each far cache
    pub l1_fanout: Vec<usize>,

    /// Unbalanced only: number of clients under each near cache
    pub l2_fanout: Vec<usize>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            n_clients: 8,
            n_l1_caches: 2,
            n_l2_caches: 4,
            balanced: true,
            l1_fanout: Vec::new(),
            l2_fanout: Vec::new(),
        }
    }
}

/// Store seeding parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Keys `0..initial_keys` exist at startup
    pub initial_keys: u32,

    /// Initial values are drawn from `[0, value_range)`
    pub value_range: Value,

    /// Fixed RNG seed for reproducible initial values
    pub seed: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_keys: 10,
            value_range: 200,
            seed: None,
        }
    }
}

/// Complete startup configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub topology: TopologyConfig,
    pub timeouts: Vec<TimeoutEntry>,
    pub store: StoreConfig,
    pub fallback: FallbackPolicy,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            topology: TopologyConfig::default(),
            timeouts: vec![TimeoutEntry::new("read", 1000), TimeoutEntry::new("write", 1000)],
            store: StoreConfig::default(),
            fallback: FallbackPolicy::default(),
        }
    }
}

impl SystemConfig {
    /// Create a new builder for system configuration
    pub fn builder() -> SystemConfigBuilder {
        SystemConfigBuilder::default()
    }

    /// Build the timeout table described by this configuration
    pub fn timeout_table(&self) -> Result<TimeoutTable> {
        let table = TimeoutTable::from_entries(&self.timeouts)?;
        match self.fallback {
            FallbackPolicy::RetryViaStore => table.fit_store_retry(),
            FallbackPolicy::FailFast => Ok(table),
        }
    }

    /// Validate the configuration
    ///
    /// Topology shape is checked by the topology builder; this covers the
    /// rest so that every error surfaces before a node is created.
    pub fn validate(&self) -> Result<()> {
        self.timeout_table()?;

        if self.store.value_range <= 0 {
            return Err(CacheError::ConfigurationError(
                "store.value_range must be greater than 0".to_string(),
            ));
        }

        crate::topology::Topology::build(&self.topology).map(|_| ())
    }
}

/// Builder for system configuration
#[derive(Debug, Default)]
pub struct SystemConfigBuilder {
    n_clients: Option<usize>,
    n_l1_caches: Option<usize>,
    n_l2_caches: Option<usize>,
    fanout: Option<(Vec<usize>, Vec<usize>)>,
    timeouts: Vec<TimeoutEntry>,
    initial_keys: Option<u32>,
    value_range: Option<Value>,
    seed: Option<u64>,
    fallback: Option<FallbackPolicy>,
}

impl SystemConfigBuilder {
    pub fn n_clients(mut self, n: usize) -> Self {
        self.n_clients = Some(n);
        self
    }

    pub fn n_l1_caches(mut self, n: usize) -> Self {
        self.n_l1_caches = Some(n);
        self
    }

    pub fn n_l2_caches(mut self, n: usize) -> Self {
        self.n_l2_caches = Some(n);
        self
    }

    /// Switch to an unbalanced tree with explicit per-node fan-out
    ///
    /// Node counts are derived from the fan-out lists.
    pub fn unbalanced(mut self, l1_fanout: Vec<usize>, l2_fanout: Vec<usize>) -> Self {
        self.fanout = Some((l1_fanout, l2_fanout));
        self
    }

    pub fn read_timeout(self, timeout: Duration) -> Self {
        self.timeout("read", timeout)
    }

    pub fn write_timeout(self, timeout: Duration) -> Self {
        self.timeout("write", timeout)
    }

    /// Set a timeout record by configuration type name (e.g. `l2_read`)
    pub fn timeout(mut self, kind: &str, timeout: Duration) -> Self {
        self.timeouts.retain(|entry| entry.kind != kind);
        self.timeouts
            .push(TimeoutEntry::new(kind, timeout.as_millis() as u64));
        self
    }

    pub fn initial_keys(mut self, n: u32) -> Self {
        self.initial_keys = Some(n);
        self
    }

    pub fn value_range(mut self, range: Value) -> Self {
        self.value_range = Some(range);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn fallback(mut self, policy: FallbackPolicy) -> Self {
        self.fallback = Some(policy);
        self
    }

    /// Build the system configuration
    pub fn build(self) -> SystemConfig {
        let defaults = SystemConfig::default();

        let topology = match self.fanout {
            Some((l1_fanout, l2_fanout)) => TopologyConfig {
                n_clients: l2_fanout.iter().sum(),
                n_l1_caches: l1_fanout.len(),
                n_l2_caches: l2_fanout.len(),
                balanced: false,
                l1_fanout,
                l2_fanout,
            },
            None => TopologyConfig {
                n_clients: self.n_clients.unwrap_or(defaults.topology.n_clients),
                n_l1_caches: self.n_l1_caches.unwrap_or(defaults.topology.n_l1_caches),
                n_l2_caches: self.n_l2_caches.unwrap_or(defaults.topology.n_l2_caches),
                ..defaults.topology
            },
        };

        let mut timeouts = defaults.timeouts;
        for entry in self.timeouts {
            timeouts.retain(|existing| existing.kind != entry.kind);
            timeouts.push(entry);
        }

        SystemConfig {
            topology,
            timeouts,
            store: StoreConfig {
                initial_keys: self.initial_keys.unwrap_or(defaults.store.initial_keys),
                value_range: self.value_range.unwrap_or(defaults.store.value_range),
                seed: self.seed.or(defaults.store.seed),
            },
            fallback: self.fallback.unwrap_or(defaults.fallback),
        }
    }
}
