//! Thin wrapper around `russh` for the one thing the fallback path needs:
//! open a connection, run exactly one exec channel per command, and tear
//! it down. No connection pooling — operator machines that need the SSH
//! fallback are, by definition, not maintaining a persistent link.

use crate::error::SshError;
use russh::client::{self, Handle};
use russh::ChannelMsg;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Publickey auth is tried first when set; `password` is the fallback
    /// for operator machines with no key on file (spec §4.J: "host, port,
    /// user, key/password, remote OS, allowed roots").
    pub private_key_path: Option<PathBuf>,
    pub password: Option<String>,
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key_path", &self.private_key_path)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Accepts any host key. The worker's websocket client makes the same
/// trade-off for the gateway's TLS certificate (see the design notes) —
/// operator-controlled endpoints, trusted out of band via the connection
/// details exchanged at pairing time rather than a certificate chain.
struct AcceptAnyHostKey;

#[async_trait::async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct SshClient {
    session: Handle<AcceptAnyHostKey>,
}

impl SshClient {
    pub async fn connect(config: &SshConfig) -> Result<Self, SshError> {
        let russh_config = Arc::new(client::Config::default());
        let mut session = client::connect(
            russh_config,
            (config.host.as_str(), config.port),
            AcceptAnyHostKey,
        )
        .await
        .map_err(SshError::Connect)?;

        let authenticated = if let Some(key_path) = &config.private_key_path {
            let key_pair = russh_keys::load_secret_key(key_path, None)
                .map_err(|e| SshError::Key(e.to_string()))?;
            session
                .authenticate_publickey(&config.username, Arc::new(key_pair))
                .await
                .map_err(SshError::Connect)?
        } else if let Some(password) = &config.password {
            session
                .authenticate_password(&config.username, password)
                .await
                .map_err(SshError::Connect)?
        } else {
            return Err(SshError::Key("no private key path or password configured".to_string()));
        };
        if !authenticated {
            return Err(SshError::AuthFailed);
        }

        Ok(Self { session })
    }

    /// Run `command` on a fresh exec channel, collecting stdout/stderr
    /// until EOF or `timeout_secs` elapses.
    pub async fn exec(
        &mut self,
        command: &str,
        timeout_secs: u64,
    ) -> Result<(i32, String, String), SshError> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(SshError::Channel)?;
        channel.exec(true, command).await.map_err(SshError::Channel)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        let drain = async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        stderr.extend_from_slice(&data)
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                        exit_status = Some(code as i32);
                    }
                    Some(ChannelMsg::Eof) | None => break,
                    _ => {}
                }
            }
        };

        match tokio::time::timeout(Duration::from_secs(timeout_secs), drain).await {
            Ok(()) => Ok((
                exit_status.unwrap_or(-1),
                String::from_utf8_lossy(&stdout).into_owned(),
                String::from_utf8_lossy(&stderr).into_owned(),
            )),
            Err(_) => {
                let _ = channel.close().await;
                Ok((-1, String::new(), format!("ssh command timed out after {timeout_secs}s")))
            }
        }
    }

    /// Open a dedicated `sftp` subsystem channel, used for filesystem
    /// actions instead of shelling out to `cat`/redirection.
    pub async fn sftp(&mut self) -> Result<russh_sftp::client::SftpSession, SshError> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(SshError::Channel)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(SshError::Channel)?;
        russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::Sftp(e.to_string()))
    }
}
