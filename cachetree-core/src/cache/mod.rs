//! # Cache Tier
//!
//! Far caches (L1) and near caches (L2) run one state machine,
//! [`CacheNode`], that differs only in its links and hop timeouts.
//!
//! ## Behaviour
//!
//! - **Read**: answered from the local table on a hit. On a miss it is
//!   forwarded upward, and concurrent reads of the same key join the
//!   request already in flight.
//! - **Write**: always forwarded upward. The store assigns the version, and
//!   once confirmed the entry is stored, answered downward and pushed to
//!   every other child.
//! - **Update push**: applied only when newer than the local version, then
//!   fanned out to all children.
//! - **Crash / Recover**: a crashed node drops its table and pending
//!   requests and stays silent until recovered. It then starts cold.
//!
//! Every upward request is guarded by a deadline. On expiry the node
//! applies its [`FallbackPolicy`](crate::config::FallbackPolicy): fail the
//! waiters, or (near caches only) retry once directly at the store.

pub mod node;
pub mod stats;

pub use node::{CacheLinks, CacheNode};
pub use stats::CacheStats;
