//! # cachetree-core
//!
//! A tiered cache in front of a single authoritative key-value store.
//! Clients talk to near caches (L2), near caches to far caches (L1), and
//! far caches to the store. Each node is a tokio task with a private
//! mailbox, so no state is shared between nodes.
//!
//! ## Features
//!
//! - Write-through caching, with the store's confirmed entry pushed down
//!   the tree after every write
//! - Version-ordered update application (a node never regresses a key)
//! - Coalescing of concurrent reads of the same key at each cache
//! - Deadline-guarded upward requests with a configurable fallback policy
//! - Crash/recover fault injection addressed by node identity
//!
//! ## Example
//!
//! ```no_run
//! use cachetree_core::{CacheSystem, SystemConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SystemConfig::builder()
//!         .n_l1_caches(2)
//!         .n_l2_caches(4)
//!         .n_clients(8)
//!         .read_timeout(Duration::from_millis(500))
//!         .build();
//!
//!     let system = CacheSystem::start(config).await?;
//!     let client = system.client("client3")?;
//!
//!     let confirmed = client.write(5, 77).await?;
//!     println!("store assigned version {}", confirmed.version);
//!
//!     system.fault_injector().crash("l1cache0")?;
//!     match system.client("client0")?.read(5).await {
//!         Ok(value) => println!("read {}", value),
//!         Err(e) => println!("read failed: {}", e),
//!     }
//!
//!     system.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod message;
pub mod pending;
pub mod store;
pub mod system;
pub mod topology;
pub mod types;

pub use cache::{CacheLinks, CacheNode, CacheStats};
pub use client::ClientHandle;
pub use config::{
    FallbackPolicy, StoreConfig, SystemConfig, TimeoutEntry, TimeoutTable, TopologyConfig,
};
pub use control::{FaultInjector, NodeListing, NodeStatus};
pub use error::{CacheError, Result};
pub use message::NodeSnapshot;
pub use store::StoreHandle;
pub use system::CacheSystem;
pub use topology::Topology;
pub use types::{Entry, Key, Liveness, NodeId, NodeKind, RequestKind, Value, Version};
