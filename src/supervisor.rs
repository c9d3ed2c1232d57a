use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::cluster::{Cluster, ClusterSnapshot};
use crate::node::{NodeDict, NodeHandle};
use crate::probe::Probe;

/// One `(node, cluster_id)` pairing used in an event list, e.g. a node
/// that just became a primary and the cluster it belongs to.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub node: NodeHandle,
    pub cluster_id: i64,
}

/// The aggregated event set produced by one [`Supervisor::tick`].
#[derive(Debug, Default)]
pub struct EventBatch {
    pub primary_down: Vec<NodeEvent>,
    pub primary_up: Vec<NodeEvent>,
    pub replica_down: Vec<NodeEvent>,
    pub replica_up: Vec<NodeEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorSnapshot {
    pub clusters: Vec<ClusterSnapshot>,
    pub clusterless: Vec<NodeDict>,
}

/// The process-wide engine: owns every cluster, the clusterless pool, and
/// the next-cluster-id counter. Runs on a single task — nothing else
/// mutates cluster state concurrently.
pub struct Supervisor {
    probe: Arc<dyn Probe>,
    clusters: Vec<Cluster>,
    clusterless: Vec<NodeHandle>,
    next_cluster_id: i64,
    max_sync_delay: i64,
    recover_sync_delay: i64,
}

struct Partitioned {
    primaries: Vec<NodeHandle>,
    replicas: Vec<NodeHandle>,
    errored: Vec<NodeHandle>,
}

impl Supervisor {
    /// Probes every configured node, seeds clusters for whichever report as
    /// primary, sleeps `max_sync_delay` seconds so replicas have time to
    /// observe the just-written heartbeat rows, then attaches replicas to
    /// their cluster by matching `primary_name`.
    pub async fn new(
        nodes: Vec<NodeHandle>,
        probe: Arc<dyn Probe>,
        max_sync_delay: i64,
        recover_sync_delay: i64,
        now: i64,
    ) -> Self {
        let mut supervisor = Self {
            probe,
            clusters: Vec::new(),
            clusterless: Vec::new(),
            next_cluster_id: 0,
            max_sync_delay,
            recover_sync_delay,
        };

        let partitioned = supervisor.partition(nodes).await;
        supervisor.clusterless.extend(partitioned.errored);

        for primary in partitioned.primaries {
            supervisor.seed_cluster(primary, now).await;
        }

        info!(seconds = max_sync_delay, "waiting for replicas to observe primary heartbeats");
        tokio::time::sleep(std::time::Duration::from_secs(max_sync_delay.max(0) as u64)).await;

        supervisor.assign_replicas(partitioned.replicas, true).await;
        supervisor
    }

    async fn partition(&self, nodes: Vec<NodeHandle>) -> Partitioned {
        let mut primaries = Vec::new();
        let mut replicas = Vec::new();
        let mut errored = Vec::new();

        for node in nodes {
            if self.probe.refresh_role(&node).await.is_err() {
                errored.push(node);
                continue;
            }
            if node.is_replica().await {
                replicas.push(node);
            } else {
                primaries.push(node);
            }
        }

        Partitioned { primaries, replicas, errored }
    }

    async fn seed_cluster(&mut self, primary: NodeHandle, now: i64) -> bool {
        let cluster_id = self.next_cluster_id;
        match self.probe.update_heartbeat(&primary, cluster_id, now).await {
            Ok(()) => {
                self.next_cluster_id += 1;
                self.clusters.push(Cluster::new_with_primary(
                    cluster_id,
                    self.max_sync_delay,
                    self.recover_sync_delay,
                    primary,
                    now,
                ));
                true
            }
            Err(_) => {
                self.clusterless.push(primary);
                false
            }
        }
    }

    /// `by_name`: route by matching `refresh_info`'s observed
    /// `primary_name` against a cluster's current primary (required at
    /// cold start, since cluster ids from a previous run are meaningless).
    /// Otherwise route by `cluster_id`. Unmatched nodes return to
    /// `clusterless`.
    async fn assign_replicas(&mut self, replicas: Vec<NodeHandle>, by_name: bool) {
        for node in replicas {
            let _ = self.probe.refresh_info(&node).await;

            let target = if by_name {
                let primary_name = node.primary_name().await;
                self.clusters.iter().position(|c| {
                    c.primary().map(|p| p.name == primary_name).unwrap_or(false)
                })
            } else {
                let cluster_id = node.cluster_id().await;
                self.clusters.iter().position(|c| c.cluster_id == cluster_id)
            };

            match target {
                Some(idx) => {
                    if let Err(err) = self.clusters[idx].add_node(node.clone()).await {
                        warn!(node = %node.name, error = %err, "dropping node to clusterless pool");
                        self.clusterless.push(node);
                    }
                }
                None => self.clusterless.push(node),
            }
        }
    }

    /// One tick: reconciles every existing cluster, re-partitions whatever
    /// comes back clusterless (seeding fresh clusters for new primaries,
    /// routing fresh replicas by `cluster_id`), and returns the aggregated
    /// event batch.
    pub async fn tick(&mut self, now: i64) -> EventBatch {
        let mut events = EventBatch::default();
        let mut freshly_clusterless = Vec::new();

        for cluster in &mut self.clusters {
            let cluster_id = cluster.cluster_id;
            let delta = cluster.update(self.probe.as_ref(), now).await;

            if let Some(n) = delta.primary_down {
                events.primary_down.push(NodeEvent { node: n, cluster_id });
            }
            if let Some(n) = delta.primary_up {
                events.primary_up.push(NodeEvent { node: n, cluster_id });
            }
            for n in delta.replicas_down {
                events.replica_down.push(NodeEvent { node: n, cluster_id });
            }
            for n in delta.replicas_up {
                events.replica_up.push(NodeEvent { node: n, cluster_id });
            }
            freshly_clusterless.extend(delta.out);
        }

        freshly_clusterless.extend(std::mem::take(&mut self.clusterless));
        let partitioned = self.partition(freshly_clusterless).await;
        self.clusterless = partitioned.errored;

        for primary in partitioned.primaries {
            self.seed_cluster(primary, now).await;
        }
        self.assign_replicas(partitioned.replicas, false).await;

        events
    }

    pub async fn snapshot(&self) -> SupervisorSnapshot {
        let mut clusters = Vec::with_capacity(self.clusters.len());
        for cluster in &self.clusters {
            clusters.push(cluster.snapshot().await);
        }
        let mut clusterless = Vec::with_capacity(self.clusterless.len());
        for node in &self.clusterless {
            clusterless.push(node.dict().await);
        }
        SupervisorSnapshot { clusters, clusterless }
    }

    pub fn cluster_ids(&self) -> Vec<i64> {
        self.clusters.iter().map(|c| c.cluster_id).collect()
    }
}

/// True if `events` contain no changes at all — used by the main loop to
/// skip trigger dispatch on a quiet tick.
pub fn is_empty(events: &EventBatch) -> bool {
    events.primary_down.is_empty()
        && events.primary_up.is_empty()
        && events.replica_down.is_empty()
        && events.replica_up.is_empty()
}
