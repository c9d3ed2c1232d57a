use thiserror::Error;

/// The single failure signal produced by the probe boundary.
///
/// A `ProbeError` collapses every granular database failure (connection
/// refused, auth failure, timeout, missing table, malformed row) into one
/// meaning: the state of the node cannot be determined right now, so it
/// must be treated as lost. It is never allowed to propagate past
/// [`crate::cluster::Cluster::classify`].
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: sqlx::Error,
    },
    #[error("connect to {host}:{port} timed out after {timeout_secs}s")]
    Timeout { host: String, port: u16, timeout_secs: u64 },
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Fatal configuration problems, reported to stderr and exit code 1.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key: {0}")]
    MissingRequired(&'static str),
    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by [`crate::cluster::Cluster::add_node`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster already has a primary; cannot add a second one")]
    DuplicatePrimary,
}

/// Errors from the daemon/CLI process shell (PID file, fork, signals).
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("pid file {0} not found - is the daemon running?")]
    PidFileMissing(String),
    #[error("could not read pid from {0}")]
    PidFileMalformed(String),
    #[error("no process matching pid {0}")]
    NoSuchProcess(i32),
    #[error("no such user: {0}")]
    NoSuchUser(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Errno(#[from] nix::errno::Errno),
}
