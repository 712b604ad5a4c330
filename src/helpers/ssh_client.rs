//! SSH transport for remote sessions
//!
//! Uses russh to log into target servers with their account and password,
//! run shell commands and stream artifacts onto them.

use async_trait::async_trait;
use russh::client::{Config, Handle};
use russh::{ChannelMsg, Disconnect, Preferred};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::errors::DeployError;
use crate::models::TargetServer;
use crate::services::remote::{FileTransfer, RemoteSession, RemoteShell, SessionConnector};

/// SSH client handler for russh
struct ClientHandler;

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Target servers are registered by administrators; host keys are not pinned.
        Ok(true)
    }
}

/// Captured output of one remote command.
#[derive(Debug, Clone, Default)]
struct ExecOutput {
    output: Vec<u8>,
    exit_status: Option<u32>,
    timed_out: bool,
}

impl ExecOutput {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }
}

/// Quotes a path for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn remote_file_path(remote_dir: &str, file_name: &str) -> String {
    format!("{}/{}", remote_dir.trim_end_matches('/'), file_name)
}

/// Opens password-authenticated SSH sessions.
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn connect(&self, server: &TargetServer) -> Result<Box<dyn RemoteSession>, DeployError> {
        let session = SshSession::connect(server, self.connect_timeout, self.command_timeout).await?;
        Ok(Box::new(session))
    }
}

/// One logged-in SSH connection. Every command runs on its own channel.
pub struct SshSession {
    host: String,
    handle: Mutex<Option<Handle<ClientHandler>>>,
    command_timeout: Duration,
}

impl SshSession {
    pub async fn connect(
        server: &TargetServer,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, DeployError> {
        let config = Arc::new(Config {
            preferred: Preferred::DEFAULT,
            inactivity_timeout: Some(command_timeout + connect_timeout),
            ..Default::default()
        });

        tracing::info!("Connecting to {}:{} as {}", server.ip, server.port, server.account);
        let handle = match timeout(connect_timeout, connect_and_auth(config, server)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                tracing::warn!("SSH connection/auth failed: {}", err);
                return Err(DeployError::connection(&server.ip, err));
            }
            Err(_) => {
                tracing::warn!("SSH connection timed out after {:?}", connect_timeout);
                return Err(DeployError::connection(
                    &server.ip,
                    format!("timed out after {} seconds", connect_timeout.as_secs()),
                ));
            }
        };

        Ok(Self {
            host: server.ip.clone(),
            handle: Mutex::new(Some(handle)),
            command_timeout,
        })
    }

    /// Runs `command`, optionally feeding `stdin` from a local file, and
    /// collects stdout, stderr and the exit status.
    async fn run(&self, command: &str, stdin: Option<&Path>) -> Result<ExecOutput, DeployError> {
        let mut channel = {
            let handle = self.handle.lock().await;
            let handle = handle
                .as_ref()
                .ok_or_else(|| DeployError::remote_command(&self.host, command, "session closed"))?;
            handle
                .channel_open_session()
                .await
                .map_err(|err| DeployError::remote_command(&self.host, command, err))?
        };
        channel
            .exec(true, command)
            .await
            .map_err(|err| DeployError::remote_command(&self.host, command, err))?;

        if let Some(local) = stdin {
            let file = tokio::fs::File::open(local)
                .await
                .map_err(|err| DeployError::transfer(&self.host, err))?;
            channel
                .data(file)
                .await
                .map_err(|err| DeployError::transfer(&self.host, err))?;
            channel
                .eof()
                .await
                .map_err(|err| DeployError::transfer(&self.host, err))?;
        }

        let mut result = ExecOutput::default();
        let read = timeout(self.command_timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => result.output.extend_from_slice(&data),
                    Some(ChannelMsg::ExtendedData { data, ext: _ }) => {
                        result.output.extend_from_slice(&data)
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        result.exit_status = Some(exit_status)
                    }
                    Some(ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
        })
        .await;

        if read.is_err() {
            tracing::warn!(host = %self.host, "Command '{}' timed out", command);
            result.timed_out = true;
        }

        let _ = channel.eof().await;
        let _ = channel.close().await;

        Ok(result)
    }
}

/// Connect and authenticate to the SSH server
async fn connect_and_auth(
    config: Arc<Config>,
    server: &TargetServer,
) -> Result<Handle<ClientHandler>, anyhow::Error> {
    let mut handle = russh::client::connect(config, server.address(), ClientHandler).await?;

    let auth = handle
        .authenticate_password(server.account.as_str(), server.password.as_str())
        .await?;

    if !auth.success() {
        return Err(anyhow::anyhow!(
            "password authentication rejected for {}",
            server.account
        ));
    }

    Ok(handle)
}

#[async_trait]
impl RemoteShell for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &str) {
        match self.run(command, None).await {
            Ok(ExecOutput {
                timed_out: true, ..
            }) => {}
            Ok(ExecOutput {
                exit_status: Some(0),
                ..
            }) => tracing::debug!(host = %self.host, "Executed: {}", command),
            Ok(done) => tracing::warn!(
                host = %self.host,
                exit_status = ?done.exit_status,
                output = %done.text(),
                "Command '{}' did not succeed",
                command
            ),
            Err(err) => tracing::error!(host = %self.host, "{}", err),
        }
    }

    async fn execute_for_result(&self, command: &str) -> Result<String, DeployError> {
        let done = self.run(command, None).await?;
        Ok(done.text())
    }

    async fn close(&self) {
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        if let Err(err) = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            tracing::debug!(host = %self.host, "Disconnect failed: {}", err);
        }
    }
}

#[async_trait]
impl FileTransfer for SshSession {
    async fn put_file(&self, local: &Path, remote_dir: &str) -> Result<(), DeployError> {
        let file_name = local
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                DeployError::transfer(&self.host, format!("invalid artifact path {}", local.display()))
            })?;
        let destination = remote_file_path(remote_dir, file_name);
        let command = format!("cat > {}", shell_quote(&destination));

        tracing::info!(host = %self.host, "Uploading {} to {}", local.display(), destination);
        let done = self.run(&command, Some(local)).await?;
        match done.exit_status {
            Some(0) if !done.timed_out => Ok(()),
            status => Err(DeployError::transfer(
                &self.host,
                format!(
                    "writing {} exited with {:?}: {}",
                    destination,
                    status,
                    done.text().trim()
                ),
            )),
        }
    }
}
