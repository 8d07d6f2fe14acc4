//! Random workload driver
//!
//! Every client runs its share of operations sequentially while all
//! clients run concurrently, which is the traffic pattern the coherence
//! protocol is meant to survive.

use cachetree_core::{
    CacheError, CacheStats, CacheSystem, ClientHandle, Key, NodeId, NodeKind, Result, Value,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

/// Shape of a simulated workload
#[derive(Debug, Clone)]
pub struct Workload {
    /// Operations issued by each client
    pub ops_per_client: usize,
    /// Probability that an operation is a write
    pub write_ratio: f64,
    /// Keys are drawn from `[0, key_space)`
    pub key_space: Key,
    /// Written values are drawn from `[0, value_range)`
    pub value_range: Value,
    pub seed: Option<u64>,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            ops_per_client: 100,
            write_ratio: 0.2,
            key_space: 10,
            value_range: 200,
            seed: None,
        }
    }
}

/// Outcome counts for a group of operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outcomes {
    pub reads: u64,
    pub writes: u64,
    pub not_found: u64,
    pub timeouts: u64,
    pub other_errors: u64,
}

impl Outcomes {
    fn record(&mut self, result: Result<()>) {
        match result {
            Ok(()) => {}
            Err(CacheError::KeyNotFound { .. }) => self.not_found += 1,
            Err(CacheError::RequestTimedOut { .. }) => self.timeouts += 1,
            Err(_) => self.other_errors += 1,
        }
    }

    fn merge(&mut self, other: &Outcomes) {
        self.reads += other.reads;
        self.writes += other.writes;
        self.not_found += other.not_found;
        self.timeouts += other.timeouts;
        self.other_errors += other.other_errors;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub kind: NodeKind,
    pub stats: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u128,
    pub outcomes: Outcomes,
    /// Counters summed over every cache node
    pub cache_totals: CacheStats,
    pub nodes: Vec<NodeReport>,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulation finished in {}ms", self.elapsed_ms)?;
        writeln!(
            f,
            "  reads: {}, writes: {}, not found: {}, timed out: {}, other errors: {}",
            self.outcomes.reads,
            self.outcomes.writes,
            self.outcomes.not_found,
            self.outcomes.timeouts,
            self.outcomes.other_errors
        )?;
        writeln!(f, "  caches: {}", self.cache_totals)?;
        for node in &self.nodes {
            writeln!(f, "  {:<10} {}", node.id, node.stats)?;
        }
        Ok(())
    }
}

/// Run `workload` against every client of `system` and collect per-node stats
pub async fn run(system: &CacheSystem, workload: &Workload) -> Result<SimulationReport> {
    if workload.key_space == 0 || workload.value_range <= 0 {
        return Err(CacheError::ConfigurationError(
            "workload key_space and value_range must be greater than 0".to_string(),
        ));
    }

    let started_at = Utc::now();
    let started = Instant::now();
    let clients = system.clients();
    info!(
        "Running {} operations on each of {} clients",
        workload.ops_per_client,
        clients.len()
    );

    let runs = clients.iter().enumerate().map(|(index, client)| {
        let rng = match workload.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        };
        drive(client, workload, rng)
    });

    let mut outcomes = Outcomes::default();
    for client_outcomes in join_all(runs).await {
        outcomes.merge(&client_outcomes);
    }

    let mut nodes = Vec::new();
    let mut cache_totals = CacheStats::default();
    for spec in system.topology().nodes() {
        let stats = system.stats(spec.id.as_str()).await?;
        if spec.kind.is_cache() {
            cache_totals.merge(&stats);
        }
        nodes.push(NodeReport {
            id: spec.id.clone(),
            kind: spec.kind,
            stats,
        });
    }

    Ok(SimulationReport {
        started_at,
        elapsed_ms: started.elapsed().as_millis(),
        outcomes,
        cache_totals,
        nodes,
    })
}

async fn drive(client: &ClientHandle, workload: &Workload, mut rng: StdRng) -> Outcomes {
    let mut outcomes = Outcomes::default();

    for _ in 0..workload.ops_per_client {
        let key = rng.gen_range(0..workload.key_space);
        if rng.gen_bool(workload.write_ratio.clamp(0.0, 1.0)) {
            let value = rng.gen_range(0..workload.value_range);
            outcomes.writes += 1;
            let result = client.write(key, value).await.map(|_| ());
            outcomes.record(result);
        } else {
            outcomes.reads += 1;
            let result = client.read(key).await.map(|_| ());
            outcomes.record(result);
        }
    }

    debug!("{} finished: {:?}", client.id(), outcomes);
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachetree_core::SystemConfig;

    #[tokio::test]
    async fn test_workload_without_faults() {
        let system = CacheSystem::start(SystemConfig::builder().seed(9).build())
            .await
            .unwrap();
        let workload = Workload {
            ops_per_client: 20,
            seed: Some(9),
            ..Default::default()
        };

        let report = run(&system, &workload).await.unwrap();
        assert_eq!(report.outcomes.reads + report.outcomes.writes, 8 * 20);
        assert_eq!(report.outcomes.timeouts, 0);
        assert_eq!(report.outcomes.not_found, 0);
        assert_eq!(report.nodes.len(), 15);
        assert!(report.cache_totals.hits > 0);

        system.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_empty_key_space() {
        let system = CacheSystem::start(SystemConfig::default()).await.unwrap();
        let workload = Workload {
            key_space: 0,
            ..Default::default()
        };

        assert!(matches!(
            run(&system, &workload).await,
            Err(CacheError::ConfigurationError(_))
        ));
    }
}
