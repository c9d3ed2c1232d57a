use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection, Row};
use tracing::debug;

use super::Probe;
use crate::error::ProbeError;
use crate::node::Node;

/// The subset of [`crate::config::Settings`] a probe needs, kept separate
/// so tests can build one without a full `Settings` value.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub is_slave_statement: String,
    pub connect_timeout: u64,
}

/// Probes a real PostgreSQL server. Opens exactly one [`PgConnection`] per
/// operation — never a pool — and drops it on every exit path, including
/// error, so a `ProbeError` never leaks an open connection.
pub struct PostgresProbe {
    config: ProbeConfig,
}

impl PostgresProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    async fn connect(&self, node: &Node) -> Result<PgConnection, ProbeError> {
        let options = PgConnectOptions::new()
            .host(&node.host)
            .port(node.port)
            .database(&self.config.dbname)
            .username(&self.config.user)
            .password(&self.config.password);

        let timeout = Duration::from_secs(self.config.connect_timeout);
        match tokio::time::timeout(timeout, PgConnection::connect_with(&options)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(source)) => {
                Err(ProbeError::Connect { host: node.host.clone(), port: node.port, source })
            }
            Err(_) => Err(ProbeError::Timeout {
                host: node.host.clone(),
                port: node.port,
                timeout_secs: self.config.connect_timeout,
            }),
        }
    }
}

#[async_trait]
impl Probe for PostgresProbe {
    async fn refresh_role(&self, node: &Node) -> Result<(), ProbeError> {
        let mut conn = self.connect(node).await?;
        let row = sqlx::query(&self.config.is_slave_statement).fetch_one(&mut conn).await?;
        let is_replica: bool = row
            .try_get(0)
            .map_err(|e| ProbeError::Malformed(format!("is_slave_statement: {e}")))?;
        node.set_role(is_replica).await;
        debug!(node = %node.name, is_replica, "refreshed role");
        Ok(())
    }

    async fn refresh_info(&self, node: &Node) -> Result<(), ProbeError> {
        let mut conn = self.connect(node).await?;
        let row = sqlx::query("SELECT cluster_id, primary, tstamp FROM heartbeat")
            .fetch_one(&mut conn)
            .await?;
        let cluster_id: i32 = row
            .try_get("cluster_id")
            .map_err(|e| ProbeError::Malformed(format!("heartbeat row: {e}")))?;
        let primary_name: String = row
            .try_get("primary")
            .map_err(|e| ProbeError::Malformed(format!("heartbeat row: {e}")))?;
        let timestamp: i64 = row
            .try_get("tstamp")
            .map_err(|e| ProbeError::Malformed(format!("heartbeat row: {e}")))?;
        node.set_info(cluster_id as i64, primary_name, timestamp).await;
        Ok(())
    }

    async fn update_heartbeat(
        &self,
        node: &Node,
        new_cluster_id: i64,
        new_timestamp: i64,
    ) -> Result<(), ProbeError> {
        let mut conn = self.connect(node).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS heartbeat (cluster_id INT, primary TEXT, tstamp BIGINT)",
        )
        .execute(&mut conn)
        .await?;

        let count: i64 = sqlx::query("SELECT COUNT(*) FROM heartbeat")
            .fetch_one(&mut conn)
            .await?
            .try_get(0)
            .map_err(|e| ProbeError::Malformed(format!("heartbeat count: {e}")))?;
        if count == 0 {
            sqlx::query("INSERT INTO heartbeat (cluster_id, primary, tstamp) VALUES (-1, '-', 0)")
                .execute(&mut conn)
                .await?;
        }

        sqlx::query("UPDATE heartbeat SET cluster_id = $1, primary = $2, tstamp = $3")
            .bind(new_cluster_id as i32)
            .bind(&node.name)
            .bind(new_timestamp)
            .execute(&mut conn)
            .await?;

        node.set_heartbeat_timestamp(new_timestamp).await;
        Ok(())
    }
}
