//! Chaos-agent command dispatch over ssh.
//!
//! Shells out to `ssh` via `tokio::process::Command`. Authentication is
//! key-based and must be pre-configured (BatchMode refuses password
//! prompts). Each node gets a ControlMaster connection opened at startup
//! and multiplexed by every later command, so "establish connections
//! before any event runs" and "tear down at shutdown" are real operations:
//! closing the master mid-run makes in-flight commands fail, which callers
//! tolerate by logging.
//!
//! The agent's contract: stdout carries the response, any non-empty stderr
//! is a failure and its text is the failure reason.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use crate::config::NodeIdentity;
use crate::remote::{with_retries, CommandTransport, RemoteError};

/// [`CommandTransport`] over `ssh` with a per-node ControlMaster.
pub struct AgentClient {
    alias: String,
    host: String,
    ssh_port: u16,
    user: String,
    retry_count: u32,
    connect_timeout_secs: u64,
    control_path: PathBuf,
}

/// Captured output of one ssh invocation.
#[derive(Debug)]
struct SshOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

impl AgentClient {
    /// Build a client for one configured node.
    ///
    /// The ControlPath lives in the system temp directory and is unique per
    /// alias and process, so concurrent runs on the same orchestrator host
    /// do not share masters.
    pub fn new(node: &NodeIdentity) -> Self {
        let control_path = std::env::temp_dir().join(format!(
            "shakedown-{}.{}.ctl",
            node.alias,
            std::process::id()
        ));
        Self {
            alias: node.alias.clone(),
            host: node.host.clone(),
            ssh_port: node.ssh_port,
            user: node.agent_user.clone(),
            retry_count: node.retry_count,
            connect_timeout_secs: node.request_timeout_secs,
            control_path,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".into(),
            format!("ControlPath={}", self.control_path.display()),
            "-p".into(),
            self.ssh_port.to_string(),
        ]
    }

    async fn ssh(&self, extra: &[&str], command: Option<&str>) -> Result<SshOutput, RemoteError> {
        let mut args = self.base_args();
        args.extend(extra.iter().map(|s| s.to_string()));
        args.push(self.destination());
        if let Some(cmd) = command {
            args.push(cmd.to_string());
        }

        let output = Command::new("ssh").args(&args).output().await?;
        Ok(SshOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn check(&self, output: SshOutput) -> Result<String, RemoteError> {
        let stderr = output.stderr.trim();
        if output.exit_code != 0 || !stderr.is_empty() {
            let reason = if stderr.is_empty() {
                format!("exit code {}", output.exit_code)
            } else {
                stderr.to_string()
            };
            return Err(RemoteError::CommandFailed {
                host: self.host.clone(),
                stderr: reason,
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl CommandTransport for AgentClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&self) -> Result<(), RemoteError> {
        tracing::debug!("opening agent connection to {} ({})", self.alias, self.host);
        let output = self
            .ssh(
                &[
                    "-o",
                    "ControlMaster=yes",
                    "-o",
                    "ControlPersist=yes",
                    "-N",
                    "-f",
                ],
                None,
            )
            .await?;
        self.check(output)?;
        tracing::info!("agent connection to {} ({}) established", self.alias, self.host);
        Ok(())
    }

    async fn run_command(&self, command: &str) -> Result<String, RemoteError> {
        let what = format!("agent command on {}", self.alias);
        with_retries(&what, self.retry_count, || async {
            tracing::debug!("{}: {command}", self.alias);
            let output = self.ssh(&[], Some(command)).await?;
            self.check(output)
        })
        .await
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let output = self.ssh(&["-O", "exit"], None).await?;
        // "-O exit" reports success on stderr ("Exit request sent"), so only
        // the exit code decides here.
        if output.exit_code != 0 {
            return Err(RemoteError::CommandFailed {
                host: self.host.clone(),
                stderr: if output.stderr.trim().is_empty() {
                    format!("exit code {}", output.exit_code)
                } else {
                    output.stderr.trim().to_string()
                },
            });
        }
        tracing::info!("agent connection to {} ({}) closed", self.alias, self.host);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;

    fn nodes() -> Vec<NodeIdentity> {
        let config: ClusterConfig = toml::from_str(
            r#"
request_timeout_secs = 15

[nodes.n1]
host = "10.0.1.11"
api_port = 4001
ssh_port = 2222
agent_user = "chaos"

[nodes.n2]
host = "10.0.1.12"
api_port = 4001
"#,
        )
        .unwrap();
        config.identities()
    }

    #[test]
    fn base_args_carry_batch_mode_and_port() {
        let client = AgentClient::new(&nodes()[0]);
        let args = client.base_args();

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"ConnectTimeout=15".to_string()));
        assert_eq!(args[args.len() - 2], "-p");
        assert_eq!(args[args.len() - 1], "2222");
        assert_eq!(client.destination(), "chaos@10.0.1.11");
    }

    #[test]
    fn control_paths_are_per_alias() {
        let all = nodes();
        let a = AgentClient::new(&all[0]);
        let b = AgentClient::new(&all[1]);
        assert_ne!(a.control_path, b.control_path);
        assert!(a.control_path.to_string_lossy().contains("n1"));
    }

    #[test]
    fn nonempty_stderr_is_failure_even_with_exit_zero() {
        let client = AgentClient::new(&nodes()[0]);
        let err = client
            .check(SshOutput {
                stdout: "partial".into(),
                stderr: "blade: device busy\n".into(),
                exit_code: 0,
            })
            .unwrap_err();

        match err {
            RemoteError::CommandFailed { host, stderr } => {
                assert_eq!(host, "10.0.1.11");
                assert_eq!(stderr, "blade: device busy");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn nonzero_exit_reports_code_when_stderr_empty() {
        let client = AgentClient::new(&nodes()[0]);
        let err = client
            .check(SshOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 127,
            })
            .unwrap_err();
        assert!(err.to_string().contains("exit code 127"));
    }

    #[test]
    fn clean_output_passes_stdout_through() {
        let client = AgentClient::new(&nodes()[0]);
        let stdout = client
            .check(SshOutput {
                stdout: "{\"code\":200}".into(),
                stderr: String::new(),
                exit_code: 0,
            })
            .unwrap();
        assert_eq!(stdout, "{\"code\":200}");
    }
}
