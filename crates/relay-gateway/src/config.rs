//! CLI/env configuration for the gateway binary (spec §6: `RELAY_*` vars).

use clap::Parser;
use relay_policy::AllowedRoots;
use relay_ssh::Platform;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "relay-gateway", about = "Public-facing relay gateway")]
pub struct Args {
    /// Address the combined HTTP API + websocket acceptor binds to.
    /// Defaults to loopback, per spec §4.I.
    #[arg(long, env = "RELAY_GATEWAY_ADDR", default_value = "127.0.0.1:8088")]
    pub addr: SocketAddr,

    /// Bearer token the worker's websocket upgrade must present.
    #[arg(long, env = "RELAY_AUTH_TOKEN")]
    pub auth_token: String,

    /// TLS certificate (PEM). When set alongside `tls_key`, the gateway
    /// serves `https`/`wss`; otherwise it serves plain `http`/`ws` with a
    /// startup warning (spec §4.H).
    #[arg(long, env = "RELAY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,
    #[arg(long, env = "RELAY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Path to the sqlite idempotency store.
    #[arg(long, env = "RELAY_IDEMPOTENCY_DB", default_value = "relay-idempotency.sqlite3")]
    pub idempotency_db: PathBuf,

    /// How long a completed idempotency record is retained before the
    /// background cleanup task removes it.
    #[arg(long, env = "RELAY_IDEMPOTENCY_RETENTION_HOURS", default_value_t = 24)]
    pub idempotency_retention_hours: u64,

    /// Force every `/action` submission over the SSH fallback path, even
    /// when a worker is connected. `execution_mode` in `/status` reports
    /// this as `"ssh_tunnel"`.
    #[arg(long, env = "RELAY_FORCE_SSH", default_value_t = false)]
    pub force_ssh: bool,

    #[arg(long, env = "RELAY_SSH_HOST")]
    pub ssh_host: Option<String>,
    #[arg(long, env = "RELAY_SSH_PORT", default_value_t = 22)]
    pub ssh_port: u16,
    #[arg(long, env = "RELAY_SSH_USER")]
    pub ssh_user: Option<String>,
    #[arg(long, env = "RELAY_SSH_KEY_PATH")]
    pub ssh_key_path: Option<PathBuf>,
    /// Password auth, used when no key path is configured (spec §4.J:
    /// "host, port, user, key/password, remote OS, allowed roots").
    #[arg(long, env = "RELAY_SSH_PASSWORD")]
    pub ssh_password: Option<String>,
    /// Remote operating system the SSH fallback targets: `linux` or
    /// `windows` (spec §4.J).
    #[arg(long, env = "RELAY_SSH_PLATFORM", default_value = "linux")]
    pub ssh_platform: String,
    /// `;`- or `,`-delimited allowed roots enforced against SSH-fallback
    /// path parameters (spec §3 `AllowedRoots`, §6 env vars).
    #[arg(long, env = "RELAY_SSH_ALLOWED_ROOTS", default_value = "")]
    pub ssh_allowed_roots: String,

    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Resolved SSH fallback configuration, or `None` if the operator hasn't
/// provided enough to construct a client.
pub struct SshFallbackConfig {
    pub ssh: relay_ssh::SshConfig,
    pub platform: Platform,
    pub allowed_roots: AllowedRoots,
}

impl Args {
    pub fn idempotency_retention(&self) -> Duration {
        Duration::from_secs(self.idempotency_retention_hours * 3600)
    }

    pub fn tls_pair(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }

    /// Build the SSH fallback configuration if host/user and at least one
    /// of key/password are present. Any subset left unset means the
    /// fallback is disabled, not a fatal error — the gateway runs
    /// worker-only in that case.
    pub fn ssh_fallback_config(&self) -> Option<SshFallbackConfig> {
        let host = self.ssh_host.clone()?;
        let user = self.ssh_user.clone()?;
        let key_path = self.ssh_key_path.clone();
        let password = self.ssh_password.clone();
        if key_path.is_none() && password.is_none() {
            return None;
        }
        let platform = match self.ssh_platform.as_str() {
            "windows" => Platform::Windows,
            _ => Platform::Unix,
        };
        let allowed_roots = AllowedRoots::from_env_value(&self.ssh_allowed_roots);
        Some(SshFallbackConfig {
            ssh: relay_ssh::SshConfig {
                host,
                port: self.ssh_port,
                username: user,
                private_key_path: key_path,
                password,
            },
            platform,
            allowed_roots,
        })
    }
}
