use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pgwatch_sentinel::error::ProbeError;
use pgwatch_sentinel::node::{Node, NodeHandle};
use pgwatch_sentinel::probe::Probe;
use pgwatch_sentinel::supervisor::Supervisor;

/// Mirrors the Python test suite's `MockNode`: every method succeeds
/// unless the node's name is in `failing`, in which case every call
/// returns a `ProbeError`.
#[derive(Default)]
struct FakeProbe {
    roles: Mutex<HashMap<String, bool>>,
    info: Mutex<HashMap<String, (i64, String, i64)>>,
    failing: Mutex<Vec<String>>,
}

impl FakeProbe {
    fn new() -> Self {
        Self::default()
    }

    fn set_role(&self, node: &NodeHandle, is_replica: bool) {
        self.roles.lock().unwrap().insert(node.name.clone(), is_replica);
    }

    fn set_info(&self, node: &NodeHandle, cluster_id: i64, primary_name: &str, ts: i64) {
        self.info
            .lock()
            .unwrap()
            .insert(node.name.clone(), (cluster_id, primary_name.to_string(), ts));
    }

    fn fail(&self, node: &NodeHandle) {
        self.failing.lock().unwrap().push(node.name.clone());
    }

    fn is_failing(&self, node: &Node) -> bool {
        self.failing.lock().unwrap().contains(&node.name)
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn refresh_role(&self, node: &Node) -> Result<(), ProbeError> {
        if self.is_failing(node) {
            return Err(ProbeError::Malformed("fake failure".into()));
        }
        let is_replica = *self.roles.lock().unwrap().get(&node.name).unwrap_or(&true);
        node.set_role(is_replica).await;
        Ok(())
    }

    async fn refresh_info(&self, node: &Node) -> Result<(), ProbeError> {
        if self.is_failing(node) {
            return Err(ProbeError::Malformed("fake failure".into()));
        }
        let entry = self.info.lock().unwrap().get(&node.name).cloned();
        if let Some((cluster_id, primary_name, ts)) = entry {
            node.set_info(cluster_id, primary_name, ts).await;
        }
        Ok(())
    }

    async fn update_heartbeat(
        &self,
        node: &Node,
        new_cluster_id: i64,
        new_timestamp: i64,
    ) -> Result<(), ProbeError> {
        if self.is_failing(node) {
            return Err(ProbeError::Malformed("fake failure".into()));
        }
        node.set_heartbeat_timestamp(new_timestamp).await;
        self.info.lock().unwrap().insert(
            node.name.clone(),
            (new_cluster_id, node.name.clone(), new_timestamp),
        );
        Ok(())
    }
}

const MAX_SYNC_DELAY: i64 = 0; // no settle-wait sleep slows down the test suite
const RECOVER_SYNC_DELAY: i64 = 5;

#[tokio::test]
async fn startup_seeds_one_cluster_per_primary() {
    let probe = Arc::new(FakeProbe::new());
    let primary1 = Node::new("a", 1);
    let primary2 = Node::new("b", 1);
    probe.set_role(&primary1, false);
    probe.set_role(&primary2, false);

    let supervisor = Supervisor::new(
        vec![primary1, primary2],
        probe,
        MAX_SYNC_DELAY,
        RECOVER_SYNC_DELAY,
        1000,
    )
    .await;

    assert_eq!(supervisor.cluster_ids().len(), 2);
    let snapshot = supervisor.snapshot().await;
    assert!(snapshot.clusters.iter().all(|c| c.has_primary));
    assert!(snapshot.clusterless.is_empty());
}

#[tokio::test]
async fn startup_routes_replicas_by_primary_name() {
    let probe = Arc::new(FakeProbe::new());
    let primary = Node::new("a", 1);
    let replica1 = Node::new("b", 1);
    let replica2 = Node::new("c", 1);
    probe.set_role(&primary, false);
    probe.set_role(&replica1, true);
    probe.set_role(&replica2, true);
    probe.set_info(&replica1, 99, "a:1", 1000);
    probe.set_info(&replica2, 99, "a:1", 1000);

    let supervisor = Supervisor::new(
        vec![primary, replica1, replica2],
        probe,
        MAX_SYNC_DELAY,
        RECOVER_SYNC_DELAY,
        1000,
    )
    .await;

    assert_eq!(supervisor.cluster_ids(), vec![0]);
    let snapshot = supervisor.snapshot().await;
    assert_eq!(snapshot.clusters[0].replicas.len(), 2);
    assert!(snapshot.clusterless.is_empty());
}

#[tokio::test]
async fn startup_errored_nodes_become_clusterless() {
    let probe = Arc::new(FakeProbe::new());
    let primary = Node::new("a", 1);
    let broken = Node::new("b", 1);
    probe.set_role(&primary, false);
    probe.fail(&broken);

    let supervisor = Supervisor::new(
        vec![primary, broken],
        probe,
        MAX_SYNC_DELAY,
        RECOVER_SYNC_DELAY,
        1000,
    )
    .await;

    let snapshot = supervisor.snapshot().await;
    assert_eq!(snapshot.clusterless.len(), 1);
}

#[tokio::test]
async fn tick_with_no_changes_reports_no_events() {
    let probe = Arc::new(FakeProbe::new());
    let primary = Node::new("a", 1);
    let replica = Node::new("b", 1);
    probe.set_role(&primary, false);
    probe.set_role(&replica, true);
    probe.set_info(&replica, 0, "a:1", 1000);

    let mut supervisor = Supervisor::new(
        vec![primary, replica],
        probe,
        MAX_SYNC_DELAY,
        RECOVER_SYNC_DELAY,
        1000,
    )
    .await;

    let events = supervisor.tick(1000).await;
    assert!(events.primary_down.is_empty());
    assert!(events.primary_up.is_empty());
    assert!(events.replica_down.is_empty());
    assert!(events.replica_up.is_empty());
}

#[tokio::test]
async fn primary_failure_is_reported_as_primary_down() {
    let probe = Arc::new(FakeProbe::new());
    let primary = Node::new("a", 1);
    let replica = Node::new("b", 1);
    probe.set_role(&primary, false);
    probe.set_role(&replica, true);
    probe.set_info(&replica, 0, "a:1", 1000);

    let mut supervisor = Supervisor::new(
        vec![primary.clone(), replica],
        probe.clone(),
        MAX_SYNC_DELAY,
        RECOVER_SYNC_DELAY,
        1000,
    )
    .await;

    probe.fail(&primary);
    let events = supervisor.tick(1000).await;
    assert_eq!(events.primary_down.len(), 1);
}

#[tokio::test]
async fn clusterless_node_forms_a_new_cluster_once_it_recovers() {
    let probe = Arc::new(FakeProbe::new());
    let primary = Node::new("a", 1);
    let recovering = Node::new("z", 1);
    probe.set_role(&primary, false);
    probe.fail(&recovering); // errors out during startup partitioning

    let mut supervisor = Supervisor::new(
        vec![primary.clone(), recovering.clone()],
        probe.clone(),
        MAX_SYNC_DELAY,
        RECOVER_SYNC_DELAY,
        1000,
    )
    .await;
    assert_eq!(supervisor.cluster_ids().len(), 1);
    assert_eq!(supervisor.snapshot().await.clusterless.len(), 1);

    // The node comes back and reports itself as a primary.
    probe.failing.lock().unwrap().clear();
    probe.set_role(&recovering, false);

    supervisor.tick(1000).await;

    assert_eq!(supervisor.cluster_ids().len(), 2);
    assert!(supervisor.snapshot().await.clusterless.is_empty());
}
