//! Session relay.
//!
//! Once a session is routed and upgraded, the socket is handed to a
//! [`SessionRelay`]. The default [`ExecRelay`] starts the configured language
//! server inside the sandbox and shuttles bytes between the socket and the
//! process without looking at the protocol.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use keybox_sandbox::{LifecycleManager, SandboxError, SandboxName, SandboxResult, Session};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Destination of an established interactive session.
#[async_trait]
pub trait SessionRelay: Send + Sync {
    /// Serve one session until either side closes.
    async fn relay(
        &self,
        socket: WebSocket,
        name: SandboxName,
        session: Session,
    ) -> SandboxResult<()>;
}

/// Relays a session to a process started with `<runtime> exec -i`.
#[derive(Debug, Clone)]
pub struct ExecRelay {
    binary: String,
    command: Vec<String>,
    user: Option<String>,
}

impl ExecRelay {
    pub fn new(binary: impl Into<String>, command: Vec<String>, user: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            command,
            user,
        }
    }

    /// Relay using the manager's runtime binary and configured language
    /// server.
    pub fn for_manager(manager: &LifecycleManager) -> SandboxResult<Self> {
        let binary = manager.runtime().runtime_type().binary().ok_or_else(|| {
            SandboxError::Config("session relay needs a concrete container runtime".to_string())
        })?;
        let config = manager.config();
        Ok(Self::new(
            binary,
            config.lsp_command.clone(),
            config.exec_user.clone(),
        ))
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Runtime CLI arguments that start the session process.
    pub fn argv(&self, name: &SandboxName, workspace: &str) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "-i".to_string()];
        if let Some(user) = &self.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        args.push("-w".to_string());
        args.push(workspace.to_string());
        args.push(name.to_string());
        args.extend(self.command.iter().cloned());
        args
    }
}

#[async_trait]
impl SessionRelay for ExecRelay {
    async fn relay(
        &self,
        socket: WebSocket,
        name: SandboxName,
        session: Session,
    ) -> SandboxResult<()> {
        if self.command.is_empty() {
            return Err(SandboxError::Config(
                "no language server command configured".to_string(),
            ));
        }

        let mut child = Command::new(&self.binary)
            .args(self.argv(&name, &session.workspace_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::io_failure("session", "stdin not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::io_failure("session", "stdout not captured"))?;

        info!(name = %name, workspace = %session.workspace_path, "Session relay started");

        let (mut sender, mut receiver) = socket.split();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if stdin.write_all(text.as_str().as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if stdin.write_all(&data).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(name = %name, error = %e, "WebSocket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                read = stdout.read(&mut buf) => {
                    match read {
                        Ok(0) => break,
                        Ok(n) => {
                            let frame = Message::Binary(buf[..n].to_vec().into());
                            if sender.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(name = %name, error = %e, "Session process read failed");
                            break;
                        }
                    }
                }
            }
        }

        drop(stdin);
        let _ = sender.close().await;
        if let Err(e) = child.kill().await {
            debug!(name = %name, error = %e, "Session process already gone");
        }
        info!(name = %name, "Session relay finished");
        Ok(())
    }
}
