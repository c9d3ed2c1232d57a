pub mod postgres;

use async_trait::async_trait;

use crate::error::ProbeError;
use crate::node::Node;

/// Abstract capability set a [`crate::cluster::Cluster`] needs from a
/// database endpoint. Every method collapses all granular failures to
/// [`ProbeError`] — "state unknown, treat as lost" is the only signal
/// classification ever sees.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Refreshes `node.is_replica` by evaluating the configured role query.
    async fn refresh_role(&self, node: &Node) -> Result<(), ProbeError>;

    /// Refreshes `node.cluster_id`, `node.primary_name`, `node.timestamp`
    /// from the node's `heartbeat` row.
    async fn refresh_info(&self, node: &Node) -> Result<(), ProbeError>;

    /// Writes `node`'s heartbeat row, identifying it as the primary of
    /// `new_cluster_id` at `new_timestamp`.
    async fn update_heartbeat(
        &self,
        node: &Node,
        new_cluster_id: i64,
        new_timestamp: i64,
    ) -> Result<(), ProbeError>;
}

pub use postgres::PostgresProbe;
