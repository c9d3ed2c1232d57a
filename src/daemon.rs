use std::io::Write as _;
use std::sync::Arc;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{error, info};

use crate::cluster::ClusterSnapshot;
use crate::config::Settings;
use crate::error::DaemonError;
use crate::node::{Node, NodeDict};
use crate::probe::postgres::{PostgresProbe, ProbeConfig};
use crate::probe::Probe;
use crate::status;
use crate::supervisor::{self, EventBatch, Supervisor};
use crate::trigger::TriggerDispatcher;

/// Double-forks into the background, writes `pid_file`, and drops to
/// `daemon_user`, matching the Python original's `daemon.DaemonContext`
/// contract. Must be called before any tokio runtime is started — forking
/// a running multi-threaded runtime is unsound.
///
/// # Safety
/// Calls `fork(2)` directly. Must run before any additional threads
/// (including a tokio runtime) are spawned in this process.
pub unsafe fn daemonize(pid_file: &str, daemon_user: &str) -> Result<(), DaemonError> {
    use nix::unistd::{fork, setsid, ForkResult};

    match fork()? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid()?;

    match fork()? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    let mut file = std::fs::File::create(pid_file)?;
    write!(file, "{}", std::process::id())?;
    drop(file);

    drop_privileges(daemon_user)
}

/// Sets the process's gid/uid to `daemon_user`, matching the original's
/// `pwd.getpwnam(...).pw_uid` drop. No-op if `daemon_user` is empty.
fn drop_privileges(daemon_user: &str) -> Result<(), DaemonError> {
    if daemon_user.is_empty() {
        return Ok(());
    }

    let user = nix::unistd::User::from_name(daemon_user)?
        .ok_or_else(|| DaemonError::NoSuchUser(daemon_user.to_string()))?;

    // Drop the group before the user — once the uid changes we may no
    // longer have permission to change the gid.
    nix::unistd::setgid(user.gid)?;
    nix::unistd::setuid(user.uid)?;
    Ok(())
}

pub fn read_pid(pid_file: &str) -> Result<i32, DaemonError> {
    if !std::path::Path::new(pid_file).exists() {
        return Err(DaemonError::PidFileMissing(pid_file.to_string()));
    }
    let contents = std::fs::read_to_string(pid_file)
        .map_err(|_| DaemonError::PidFileMalformed(pid_file.to_string()))?;
    contents
        .trim()
        .parse::<i32>()
        .map_err(|_| DaemonError::PidFileMalformed(pid_file.to_string()))
}

/// Sends SIGTERM, polls up to three seconds for the process to exit, then
/// escalates to SIGKILL.
pub fn stop(pid_file: &str) -> Result<(), DaemonError> {
    let pid = read_pid(pid_file)?;
    let target = Pid::from_raw(pid);

    if signal::kill(target, None).is_err() {
        return Err(DaemonError::NoSuchProcess(pid));
    }

    signal::kill(target, Signal::SIGTERM)?;

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
    while std::time::Instant::now() < deadline {
        if signal::kill(target, None).is_err() {
            return Ok(());
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    signal::kill(target, Signal::SIGKILL)?;
    Ok(())
}

/// Builds the node list, probe, and supervisor from `settings`, fires the
/// startup `up` trigger, then loops: sleep `heartbeat` seconds, `tick()`,
/// dispatch per-event triggers, fire `heartbeat` per cluster, write the
/// status snapshot — until SIGTERM or SIGINT.
pub async fn run(settings: Settings) -> Result<(), DaemonError> {
    let now = now_unix();
    let nodes: Vec<_> =
        settings.nodes.iter().map(|n| Node::new(n.host.clone(), n.port)).collect();

    let probe: Arc<dyn Probe> = Arc::new(PostgresProbe::new(ProbeConfig {
        dbname: settings.dbname.clone().unwrap_or_default(),
        user: settings.user.clone().unwrap_or_default(),
        password: settings.password.clone().unwrap_or_default(),
        is_slave_statement: settings.is_slave_statement.clone(),
        connect_timeout: settings.connect_timeout.max(0) as u64,
    }));

    let mut supervisor = Supervisor::new(
        nodes,
        probe.clone(),
        settings.max_sync_delay,
        settings.recover_sync_delay(),
        now,
    )
    .await;

    let dispatcher = TriggerDispatcher::new(settings.triggers.clone(), settings.trigger_timeout);

    let startup_snapshot = supervisor.snapshot().await;
    for cluster in &startup_snapshot.clusters {
        let payload =
            cluster_payload(cluster, serde_json::Value::Null, &startup_snapshot.clusterless);
        dispatcher.fire("up", &payload).await;
    }

    let mut heartbeat_timer =
        tokio::time::interval(std::time::Duration::from_secs(settings.heartbeat.max(1) as u64));
    heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut sigterm = unix_signal(SignalKind::terminate()).map_err(DaemonError::Io)?;
    let mut sigint = unix_signal(SignalKind::interrupt()).map_err(DaemonError::Io)?;

    loop {
        tokio::select! {
            _ = heartbeat_timer.tick() => {
                let tick_time = now_unix();
                info!(tick_time, "starting tick");
                let events = supervisor.tick(tick_time).await;
                if supervisor::is_empty(&events) {
                    info!("tick produced no topology changes");
                } else {
                    dispatch_events(&dispatcher, &supervisor, &events).await;
                }
                fire_heartbeats(&dispatcher, &supervisor).await;

                let snapshot = supervisor.snapshot().await;
                if let Err(err) = status::write(&settings.status_file, &snapshot).await {
                    error!("failed to write status file: {err}");
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn dispatch_events(dispatcher: &TriggerDispatcher, supervisor: &Supervisor, events: &EventBatch) {
    let snapshot = supervisor.snapshot().await;

    for ev in &events.primary_down {
        fire_node_event(dispatcher, &snapshot, "primary_down", ev.cluster_id, &ev.node).await;
    }
    for ev in &events.primary_up {
        fire_node_event(dispatcher, &snapshot, "primary_up", ev.cluster_id, &ev.node).await;
    }
    for ev in &events.replica_down {
        fire_node_event(dispatcher, &snapshot, "replica_down", ev.cluster_id, &ev.node).await;
    }
    for ev in &events.replica_up {
        fire_node_event(dispatcher, &snapshot, "replica_up", ev.cluster_id, &ev.node).await;
    }
}

async fn fire_node_event(
    dispatcher: &TriggerDispatcher,
    snapshot: &supervisor::SupervisorSnapshot,
    trigger_name: &str,
    cluster_id: i64,
    node: &Node,
) {
    let Some(cluster) = snapshot.clusters.iter().find(|c| c.cluster_id == cluster_id) else {
        error!(trigger = trigger_name, cluster_id, "no snapshot for cluster, dropping trigger");
        return;
    };
    let trigger = serde_json::to_value(node.dict().await).unwrap_or(serde_json::Value::Null);
    let payload = cluster_payload(cluster, trigger, &snapshot.clusterless);
    dispatcher.fire(trigger_name, &payload).await;
}

async fn fire_heartbeats(dispatcher: &TriggerDispatcher, supervisor: &Supervisor) {
    let snapshot = supervisor.snapshot().await;
    for cluster in &snapshot.clusters {
        let payload = cluster_payload(cluster, serde_json::Value::Null, &snapshot.clusterless);
        dispatcher.fire("heartbeat", &payload).await;
    }
}

/// Builds one trigger payload: the cluster's current snapshot merged with
/// `trigger` (the node that caused the event, or `null` for `up`/
/// `heartbeat`) and the process-wide `clusterless` pool.
fn cluster_payload(cluster: &ClusterSnapshot, trigger: serde_json::Value, clusterless: &[NodeDict]) -> String {
    serde_json::json!({
        "cluster_id": cluster.cluster_id,
        "has_primary": cluster.has_primary,
        "primary": cluster.primary,
        "replicas": cluster.replicas,
        "lost": cluster.lost,
        "trigger": trigger,
        "clusterless": clusterless,
    })
    .to_string()
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
