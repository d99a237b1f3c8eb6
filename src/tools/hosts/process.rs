// Child-process host transport
//
// The child's stdout/stdin carry line-delimited MCP messages for the rmcp
// session. The child runs in its own process group; teardown signals the
// whole group so helpers it launched (npx, uvx, sh -c) go down with it.

use super::config::HostConfig;
use super::rpc::{HostLink, RemoteHost};
use super::TransportKind;
use crate::errors::HostError;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a child gets between SIGTERM and SIGKILL
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Spawn the configured command and run the handshake over its stdio
pub async fn connect_child_process(
    host_id: &str,
    config: &HostConfig,
) -> Result<RemoteHost, HostError> {
    let command = config
        .command
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| HostError::InvalidConfig {
            host: host_id.to_string(),
            reason: "child-process transport requires 'command'".to_string(),
        })?;

    debug!(host = %host_id, "Launching tool host: {} {}", command, config.args.join(" "));

    let mut cmd = Command::new(command);
    cmd.args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let connect_failed = |reason: String| HostError::ConnectFailed {
        host: host_id.to_string(),
        reason,
    };

    let mut child = cmd
        .spawn()
        .map_err(|e| connect_failed(format!("failed to spawn '{}': {}", command, e)))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| connect_failed("stdin unavailable".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| connect_failed("stdout unavailable".to_string()))?;

    if let Some(stderr) = child.stderr.take() {
        let host_id = host_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(host = %host_id, "stderr: {}", line);
            }
        });
    }

    let pid = child.id();
    let exited = CancellationToken::new();
    let kill = CancellationToken::new();
    {
        let host_id = host_id.to_string();
        let exited = exited.clone();
        let kill = kill.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => debug!(host = %host_id, %status, "Tool host exited"),
                    Err(e) => warn!(host = %host_id, "Waiting on tool host failed: {}", e),
                },
                _ = kill.cancelled() => {
                    if let Err(e) = child.kill().await {
                        debug!(host = %host_id, "Kill failed: {}", e);
                    }
                }
            }
            exited.cancel();
        });
    }

    let link = ProcessLink {
        host_id: host_id.to_string(),
        pid,
        exited,
        kill,
    };
    RemoteHost::handshake(
        host_id,
        TransportKind::ChildProcess,
        (stdout, stdin),
        Arc::new(link),
        config.request_timeout(),
    )
    .await
}

/// The child and its process group
struct ProcessLink {
    host_id: String,
    pid: Option<u32>,
    exited: CancellationToken,
    kill: CancellationToken,
}

impl ProcessLink {
    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                debug!(host = %self.host_id, pid, ?signal, "Signalling process group failed: {}", e)
            }
        }
    }

    async fn wait_exit(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.exited.cancelled())
            .await
            .is_ok()
    }
}

#[async_trait]
impl HostLink for ProcessLink {
    /// SIGTERM the group, SIGKILL it after the grace period. The final kill
    /// also sweeps up group members that outlived the leader.
    #[cfg(unix)]
    async fn close(&self) -> Result<(), HostError> {
        use nix::sys::signal::Signal;

        self.signal_group(Signal::SIGTERM);
        if self.wait_exit(SHUTDOWN_GRACE).await {
            info!(host = %self.host_id, "Tool host stopped");
        } else {
            warn!(host = %self.host_id, "Tool host ignored SIGTERM, killing");
        }
        self.signal_group(Signal::SIGKILL);
        self.kill.cancel();
        if !self.wait_exit(SHUTDOWN_GRACE).await {
            return Err(HostError::transport(
                &self.host_id,
                "process did not exit after SIGKILL",
            ));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn close(&self) -> Result<(), HostError> {
        self.kill.cancel();
        if !self.wait_exit(SHUTDOWN_GRACE).await {
            return Err(HostError::transport(&self.host_id, "process did not exit"));
        }
        info!(host = %self.host_id, "Tool host stopped");
        Ok(())
    }

    fn closed(&self) -> Option<CancellationToken> {
        Some(self.exited.clone())
    }
}
