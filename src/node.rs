use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

/// Sentinel value for [`NodeState::cluster_id`] meaning "unknown".
pub const UNKNOWN_CLUSTER_ID: i64 = -1;

/// A handle to one database endpoint, shared by reference across the
/// clusterless pool and whichever [`crate::cluster::Cluster`] currently
/// owns it.
///
/// Equality is by identity, not by value: the same endpoint is only ever
/// represented by one `Node`, and comparisons ("is this the primary we
/// already have?") compare the handle, never the fields. Callers use
/// [`Node::is`] (an `Arc::ptr_eq` wrapper) rather than deriving
/// `PartialEq`.
#[derive(Debug)]
pub struct Node {
    pub host: String,
    pub port: u16,
    pub name: String,
    state: RwLock<NodeState>,
}

/// The fields a probe refreshes each tick. Kept separate from `Node` so a
/// read can be taken as a cheap, owned snapshot without holding a lock
/// across an `.await`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub is_replica: bool,
    pub cluster_id: i64,
    pub primary_name: String,
    pub timestamp: i64,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            is_replica: false,
            cluster_id: UNKNOWN_CLUSTER_ID,
            primary_name: String::new(),
            timestamp: 0,
        }
    }
}

/// Serializable view of a node, used for trigger payloads and the status
/// file. Produced fresh by [`Node::dict`] every call — there is no mutable
/// cache to go stale.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDict {
    pub host: String,
    pub port: u16,
    pub cluster_id: i64,
    pub is_replica: bool,
    pub primary_name: String,
}

pub type NodeHandle = Arc<Node>;

impl Node {
    pub fn new(host: impl Into<String>, port: u16) -> NodeHandle {
        let host = host.into();
        let name = format!("{host}:{port}");
        Arc::new(Node { host, port, name, state: RwLock::new(NodeState::default()) })
    }

    /// True if `a` and `b` are handles to the same node.
    pub fn is(a: &NodeHandle, b: &NodeHandle) -> bool {
        Arc::ptr_eq(a, b)
    }

    pub async fn state(&self) -> NodeState {
        self.state.read().await.clone()
    }

    pub async fn is_replica(&self) -> bool {
        self.state.read().await.is_replica
    }

    pub async fn cluster_id(&self) -> i64 {
        self.state.read().await.cluster_id
    }

    pub async fn timestamp(&self) -> i64 {
        self.state.read().await.timestamp
    }

    pub async fn primary_name(&self) -> String {
        self.state.read().await.primary_name.clone()
    }

    pub async fn set_role(&self, is_replica: bool) {
        self.state.write().await.is_replica = is_replica;
    }

    pub async fn set_info(&self, cluster_id: i64, primary_name: String, timestamp: i64) {
        let mut state = self.state.write().await;
        state.cluster_id = cluster_id;
        state.primary_name = primary_name;
        state.timestamp = timestamp;
    }

    /// Forces this node's cached `cluster_id` to `cluster_id`, overriding
    /// whatever it last reported. Used only when a replica is promoted to
    /// primary within a cluster.
    pub async fn force_cluster_id(&self, cluster_id: i64) {
        self.state.write().await.cluster_id = cluster_id;
    }

    pub async fn set_heartbeat_timestamp(&self, timestamp: i64) {
        self.state.write().await.timestamp = timestamp;
    }

    pub async fn dict(&self) -> NodeDict {
        let state = self.state.read().await;
        NodeDict {
            host: self.host.clone(),
            port: self.port,
            cluster_id: state.cluster_id,
            is_replica: state.is_replica,
            primary_name: state.primary_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_derived_from_host_and_port() {
        let n1 = Node::new("a", 1);
        let n2 = Node::new("a", 2);
        let n3 = Node::new("b", 1);
        let n4 = Node::new("a", 1);
        assert_ne!(n1.name, n2.name);
        assert_ne!(n1.name, n3.name);
        assert_eq!(n1.name, n4.name);
    }

    #[test]
    fn identity_is_by_handle_not_value() {
        let n1 = Node::new("a", 1);
        let n2 = Node::new("a", 1);
        let n1_alias = n1.clone();
        assert!(Node::is(&n1, &n1_alias));
        assert!(!Node::is(&n1, &n2));
    }

    #[tokio::test]
    async fn state_defaults_to_sentinels() {
        let node = Node::new("a", 1);
        let state = node.state().await;
        assert_eq!(state.cluster_id, UNKNOWN_CLUSTER_ID);
        assert_eq!(state.primary_name, "");
        assert_eq!(state.timestamp, 0);
        assert!(!state.is_replica);
    }

    #[tokio::test]
    async fn set_info_updates_all_three_fields_together() {
        let node = Node::new("a", 1);
        node.set_role(true).await;
        node.set_info(12, "hello:99".to_string(), 12345).await;
        assert_eq!(node.cluster_id().await, 12);
        assert_eq!(node.primary_name().await, "hello:99");
        assert_eq!(node.timestamp().await, 12345);
        assert!(node.is_replica().await);
    }

    #[tokio::test]
    async fn dict_reflects_current_state() {
        let node = Node::new("a", 1);
        node.set_role(true).await;
        node.set_info(12, "hello:99".to_string(), 12345).await;
        let dict = node.dict().await;
        assert_eq!(dict.host, "a");
        assert_eq!(dict.port, 1);
        assert_eq!(dict.cluster_id, 12);
        assert_eq!(dict.primary_name, "hello:99");
        assert!(dict.is_replica);
    }
}
