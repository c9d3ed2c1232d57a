use serde::Serialize;

use crate::error::ClusterError;
use crate::node::{Node, NodeDict, NodeHandle};
use crate::probe::Probe;

/// The event set produced by one [`Cluster::update`] call.
#[derive(Debug, Default)]
pub struct TickDelta {
    pub primary_down: Option<NodeHandle>,
    pub primary_up: Option<NodeHandle>,
    pub replicas_down: Vec<NodeHandle>,
    pub replicas_up: Vec<NodeHandle>,
    pub out: Vec<NodeHandle>,
}

/// A pure, owned view of a cluster's current membership, used for trigger
/// payloads and the status file. Built fresh on every call — there is no
/// mutable cache to reset.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSnapshot {
    pub cluster_id: i64,
    pub has_primary: bool,
    pub primary: Option<NodeDict>,
    pub replicas: Vec<NodeDict>,
    pub lost: Vec<NodeDict>,
}

/// One primary (optional) plus its replicas and lost nodes, all sharing a
/// numeric cluster id. Owns the per-cluster reconciliation step.
pub struct Cluster {
    pub cluster_id: i64,
    pub max_sync_delay: i64,
    pub recover_sync_delay: i64,
    primary: Option<NodeHandle>,
    replicas: Vec<NodeHandle>,
    lost: Vec<NodeHandle>,
    /// The primary's last-known timestamp; the cluster's logical clock.
    pub timestamp: i64,
}

/// Output of one [`classify`] pass: which of the candidate nodes ended up
/// as the elected primary (at most one), healthy replicas, lost nodes, or
/// expelled ("out") nodes.
#[derive(Debug, Default)]
struct ClassifyOutcome {
    primary: Option<NodeHandle>,
    replicas: Vec<NodeHandle>,
    lost: Vec<NodeHandle>,
    out: Vec<NodeHandle>,
}

impl Cluster {
    pub fn new(cluster_id: i64, max_sync_delay: i64, recover_sync_delay: i64) -> Self {
        Self {
            cluster_id,
            max_sync_delay,
            recover_sync_delay,
            primary: None,
            replicas: Vec::new(),
            lost: Vec::new(),
            timestamp: 0,
        }
    }

    pub fn new_with_primary(
        cluster_id: i64,
        max_sync_delay: i64,
        recover_sync_delay: i64,
        primary: NodeHandle,
        timestamp: i64,
    ) -> Self {
        let mut cluster = Self::new(cluster_id, max_sync_delay, recover_sync_delay);
        cluster.primary = Some(primary);
        cluster.timestamp = timestamp;
        cluster
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn primary(&self) -> Option<&NodeHandle> {
        self.primary.as_ref()
    }

    pub fn replicas(&self) -> &[NodeHandle] {
        &self.replicas
    }

    pub fn lost(&self) -> &[NodeHandle] {
        &self.lost
    }

    /// Seeds this cluster with `node`'s current (already-probed) state.
    /// Used when partitioning a freshly probed pool of nodes, never during
    /// a tick's reconciliation.
    pub async fn add_node(&mut self, node: NodeHandle) -> Result<(), ClusterError> {
        let is_replica = node.is_replica().await;

        let Some(primary) = self.primary.clone() else {
            if is_replica {
                self.lost.push(node);
            } else {
                self.primary = Some(node);
            }
            return Ok(());
        };

        if !is_replica {
            return Err(ClusterError::DuplicatePrimary);
        }

        let primary_timestamp = primary.timestamp().await;
        let node_timestamp = node.timestamp().await;
        let node_primary_name = node.primary_name().await;
        let in_sync = primary_timestamp - node_timestamp <= self.max_sync_delay;
        if in_sync && node_primary_name == primary.name {
            self.replicas.push(node);
        } else {
            self.lost.push(node);
        }
        Ok(())
    }

    /// One tick of reconciliation: probes every currently-known node,
    /// reclassifies it, and returns the events that fire as a result.
    ///
    /// Runs three sub-passes in order — current primary, then current
    /// replicas, then current lost — each via [`classify`], so a
    /// surviving primary always wins promotion ties over a replica, and a
    /// replica always wins over a lost node.
    pub async fn update(&mut self, probe: &dyn Probe, tick_timestamp: i64) -> TickDelta {
        let mut delta = TickDelta::default();
        let mut new_replicas = Vec::new();
        let mut new_lost = Vec::new();
        let mut entering_primary = self.primary.clone();

        if let Some(old_primary) = self.primary.clone() {
            self.timestamp = old_primary.timestamp().await;
            let outcome = classify(
                &[old_primary.clone()],
                self.max_sync_delay,
                tick_timestamp,
                self.cluster_id,
                self.timestamp,
                entering_primary.clone(),
                probe,
            )
            .await;

            if outcome.primary.is_none() {
                delta.primary_down = Some(old_primary);
            }
            new_replicas.extend(outcome.replicas);
            new_lost.extend(outcome.lost);
            delta.out.extend(outcome.out);
            entering_primary = outcome.primary;
        }

        let current_replicas = std::mem::take(&mut self.replicas);
        let outcome = classify(
            &current_replicas,
            self.max_sync_delay,
            tick_timestamp,
            self.cluster_id,
            self.timestamp,
            entering_primary.clone(),
            probe,
        )
        .await;
        if entering_primary.is_none() {
            if let Some(new_primary) = &outcome.primary {
                new_primary.force_cluster_id(self.cluster_id).await;
                delta.primary_up = Some(new_primary.clone());
            }
        }
        entering_primary = outcome.primary;
        delta.replicas_down.extend(outcome.lost.iter().cloned());
        new_replicas.extend(outcome.replicas);
        new_lost.extend(outcome.lost);
        delta.out.extend(outcome.out);

        let current_lost = std::mem::take(&mut self.lost);
        let had_primary_before_lost_pass = entering_primary.is_some();
        let outcome = classify(
            &current_lost,
            self.recover_sync_delay,
            tick_timestamp,
            self.cluster_id,
            self.timestamp,
            entering_primary.clone(),
            probe,
        )
        .await;
        if !had_primary_before_lost_pass {
            if let Some(new_primary) = &outcome.primary {
                new_primary.force_cluster_id(self.cluster_id).await;
                delta.primary_up = Some(new_primary.clone());
            }
        }
        entering_primary = outcome.primary;
        delta.replicas_up.extend(outcome.replicas.iter().cloned());
        new_replicas.extend(outcome.replicas);
        new_lost.extend(outcome.lost);
        delta.out.extend(outcome.out);

        self.primary = entering_primary;
        self.replicas = new_replicas;
        self.lost = new_lost;
        delta
    }

    pub async fn snapshot(&self) -> ClusterSnapshot {
        let primary = match &self.primary {
            Some(n) => Some(n.dict().await),
            None => None,
        };
        let mut replicas = Vec::with_capacity(self.replicas.len());
        for n in &self.replicas {
            replicas.push(n.dict().await);
        }
        let mut lost = Vec::with_capacity(self.lost.len());
        for n in &self.lost {
            lost.push(n.dict().await);
        }
        ClusterSnapshot {
            cluster_id: self.cluster_id,
            has_primary: self.primary.is_some(),
            primary,
            replicas,
            lost,
        }
    }
}

/// Classifies `candidates` against the primary reference entering this
/// pass (`entering_primary`, `cluster_timestamp`) and `delay` threshold.
///
/// Within one call, the first candidate that qualifies as primary wins;
/// every later qualifying candidate is `out` (tie-break rule: candidate
/// order is the input's iteration order). `outcome.primary` on return is
/// the pass's final committed primary — `entering_primary` unchanged if
/// it survived unchallenged, `None` if it failed (primary pass only), or
/// a newly elected node.
async fn classify(
    candidates: &[NodeHandle],
    delay: i64,
    tick_timestamp: i64,
    cluster_id: i64,
    cluster_timestamp: i64,
    entering_primary: Option<NodeHandle>,
    probe: &dyn Probe,
) -> ClassifyOutcome {
    let mut outcome = ClassifyOutcome { primary: entering_primary.clone(), ..Default::default() };
    let mut current_primary = entering_primary;

    for node in candidates {
        if probe.refresh_role(node).await.is_err() {
            outcome.lost.push(node.clone());
            if current_primary.as_ref().is_some_and(|p| Node::is(p, node)) {
                current_primary = None;
                outcome.primary = None;
            }
            continue;
        }

        let is_replica = node.is_replica().await;

        if !is_replica {
            let is_incumbent = current_primary.as_ref().is_some_and(|p| Node::is(p, node));
            if current_primary.is_some() && !is_incumbent {
                outcome.out.push(node.clone());
                continue;
            }
            match probe.update_heartbeat(node, cluster_id, tick_timestamp).await {
                Ok(()) => {
                    current_primary = Some(node.clone());
                    outcome.primary = Some(node.clone());
                }
                Err(_) => {
                    outcome.lost.push(node.clone());
                    if is_incumbent {
                        current_primary = None;
                        outcome.primary = None;
                    }
                }
            }
            continue;
        }

        if current_primary.is_some() {
            if probe.refresh_info(node).await.is_err() {
                outcome.lost.push(node.clone());
                continue;
            }
            let node_ts = node.timestamp().await;
            if cluster_timestamp - node_ts > delay {
                outcome.lost.push(node.clone());
            } else if node.cluster_id().await != cluster_id {
                outcome.out.push(node.clone());
            } else {
                outcome.replicas.push(node.clone());
            }
        } else {
            let prev_ts = node.timestamp().await;
            let _ = probe.refresh_info(node).await;
            let advanced = node.timestamp().await != prev_ts;
            if advanced && node.cluster_id().await != cluster_id {
                outcome.out.push(node.clone());
            } else {
                outcome.replicas.push(node.clone());
            }
        }
    }

    outcome
}
