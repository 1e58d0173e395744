//! Remote command execution over SSH
//!
//! One call = one session: connect, verify the host key against known_hosts,
//! authenticate with the password, exec one command, disconnect. The whole
//! exchange shares one deadline and the disconnect runs even when it expires.
//! Every failure is logged and collapses to `None`; callers never see an error.

use async_trait::async_trait;
use russh::client;
use russh::keys::PublicKey;
use russh::{ChannelMsg, Disconnect};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{Config, Secret};

/// Runs one command on the managed server.
///
/// `None` is the uniform failure signal (unreachable, auth, timeout...).
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, command: &str) -> Option<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("known_hosts check failed: {0}")]
    KnownHosts(#[from] russh::keys::Error),

    #[error("password authentication rejected for {0}")]
    AuthRejected(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Host key verification against a known_hosts file. Unknown hosts are
/// rejected, never learned.
struct KnownHostsCheck {
    host: String,
    port: u16,
    known_hosts: PathBuf,
}

impl client::Handler for KnownHostsCheck {
    type Error = SshError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let known = russh::keys::check_known_hosts_path(
            &self.host,
            self.port,
            server_public_key,
            &self.known_hosts,
        )?;
        if !known {
            warn!(
                "Host key of {}:{} not found in {:?}, rejecting connection",
                self.host, self.port, self.known_hosts
            );
        }
        Ok(known)
    }
}

/// Output of one remote command
#[derive(Debug, Default)]
struct ExecOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

/// Password-authenticated SSH executor for the single configured host
pub struct SshExecutor {
    host: String,
    port: u16,
    login: String,
    password: Secret,
    known_hosts: PathBuf,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            login: config.login.clone(),
            password: config.password.clone(),
            known_hosts: config.known_hosts.clone(),
            timeout: config.ssh_timeout,
        }
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: Some(self.timeout),
            ..Default::default()
        });

        let handler = KnownHostsCheck {
            host: self.host.clone(),
            port: self.port,
            known_hosts: self.known_hosts.clone(),
        };

        let deadline = tokio::time::Instant::now() + self.timeout;

        let mut session = tokio::time::timeout_at(
            deadline,
            client::connect(ssh_config, (self.host.as_str(), self.port), handler),
        )
        .await
        .map_err(|_| SshError::Timeout(self.timeout))??;

        let result = tokio::time::timeout_at(deadline, self.exec_in_session(&mut session, command))
            .await
            .unwrap_or(Err(SshError::Timeout(self.timeout)));

        // Release the session on every path
        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!("SSH disconnect from {} failed: {}", self.host, e);
        }

        result
    }

    async fn exec_in_session(
        &self,
        session: &mut client::Handle<KnownHostsCheck>,
        command: &str,
    ) -> Result<ExecOutput, SshError> {
        let auth = session
            .authenticate_password(self.login.as_str(), self.password.expose())
            .await?;
        if !auth.success() {
            return Err(SshError::AuthRejected(self.login.clone()));
        }

        let mut channel = session.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut output = ExecOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    output.stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                _ => {}
            }
        }

        Ok(output)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, command: &str) -> Option<String> {
        let start = Instant::now();
        debug!("Running {:?} on {}:{}", command, self.host, self.port);

        match self.exec(command).await {
            Ok(output) => {
                if !output.stderr.is_empty() {
                    warn!(
                        "Remote command {:?} stderr: {}",
                        command,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                match output.exit_status {
                    Some(0) | None => {}
                    Some(code) => warn!("Remote command {:?} exited with status {}", command, code),
                }
                info!(
                    "Remote command {:?} finished in {:.1}s ({} bytes)",
                    command,
                    start.elapsed().as_secs_f64(),
                    output.stdout.len()
                );
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Err(e) => {
                error!(
                    "Remote command {:?} on {}:{} failed: {}",
                    command, self.host, self.port, e
                );
                None
            }
        }
    }
}
