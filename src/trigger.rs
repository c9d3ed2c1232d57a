use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::error;

/// Spawns a configured shell command per event, writes a JSON payload to
/// its stdin, and bounds the wait by `trigger_timeout`. Every failure mode
/// (missing command, spawn error, non-zero exit, timeout) is logged and
/// absorbed — a trigger never aborts a tick.
pub struct TriggerDispatcher {
    commands: HashMap<String, String>,
    timeout: Duration,
}

impl TriggerDispatcher {
    pub fn new(commands: HashMap<String, String>, timeout_secs: i64) -> Self {
        Self { commands, timeout: Duration::from_secs(timeout_secs.max(0) as u64) }
    }

    /// Fires `name` with `payload` on stdin. No-op if `name` has no
    /// configured command.
    pub async fn fire(&self, name: &str, payload: &str) {
        let Some(command) = self.commands.get(name) else {
            return;
        };

        let args = match shell_words::split(command) {
            Ok(args) if !args.is_empty() => args,
            Ok(_) => return,
            Err(err) => {
                error!(trigger = name, command, "could not parse trigger command: {err}");
                return;
            }
        };

        let mut child = match Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                error!(trigger = name, command, "could not execute trigger: {err}");
                return;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(payload.as_bytes()).await {
                error!(trigger = name, "failed to write trigger payload to stdin: {err}");
            }
            drop(stdin);
        }

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(s) = stdout.as_mut() {
                let _ = s.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(s) = stderr.as_mut() {
                let _ = s.read_to_end(&mut buf).await;
            }
            buf
        });

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                stdout_task.abort();
                stderr_task.abort();
            }
            Ok(Ok(status)) => {
                let stdout_buf = stdout_task.await.unwrap_or_default();
                let stderr_buf = stderr_task.await.unwrap_or_default();
                error!(
                    trigger = name,
                    command,
                    status = ?status.code(),
                    "trigger exited with non-zero status. stdout: {} stderr: {}",
                    String::from_utf8_lossy(&stdout_buf),
                    String::from_utf8_lossy(&stderr_buf),
                );
            }
            Ok(Err(err)) => {
                stdout_task.abort();
                stderr_task.abort();
                error!(trigger = name, "failed waiting for trigger: {err}");
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                error!(trigger = name, command, "trigger timed out, killing");
            }
        }
    }
}
