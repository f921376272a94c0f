//! Outbound-connecting worker: the operator-machine peer of the relay
//! pair. Boots, resolves its configuration from the environment, opens
//! one websocket to the gateway, and dispatches every `action_request`
//! frame it receives through the policy pipeline (spec §4.F, §4.G).

use clap::Parser;
use relay_policy::{AllowedRoots, AuditLogger, EmergencyStop, LockRegistry, RateLimiter, Validator};
use relay_worker::router::Router;
use relay_worker::ws_client::{self, WorkerIdentity};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// CLI/env configuration for the worker process (spec §6).
#[derive(Parser, Debug)]
#[command(name = "relay-worker", about = "Outbound-connecting action execution worker")]
struct Args {
    /// Websocket URL of the gateway to dial, e.g. `wss://host/ws`.
    #[arg(long, env = "RELAY_GATEWAY_URL")]
    gateway_url: String,

    /// Bearer token presented on the websocket upgrade. Missing token is
    /// a fatal configuration error (enforced by `clap` here: a required
    /// argument with no default exits non-zero when absent).
    #[arg(long, env = "RELAY_AUTH_TOKEN")]
    auth_token: String,

    /// `;`- or `,`-delimited filesystem roots every path-valued parameter
    /// must resolve inside (spec §3 `AllowedRoots`).
    #[arg(long, env = "RELAY_ALLOWED_ROOTS", default_value = "")]
    allowed_roots: String,

    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Audit JSONL path, relative to the process by default (spec §6).
    #[arg(long, env = "RELAY_AUDIT_LOG", default_value = "relay-audit.jsonl")]
    audit_log: PathBuf,

    #[arg(long, env = "RELAY_RATE_LIMIT_MAX", default_value_t = 120)]
    rate_limit_max: usize,

    #[arg(long, env = "RELAY_RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    rate_limit_window_secs: u64,
}

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relay_worker={},relay_policy={},relay_executors={}", args.log_level, args.log_level, args.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        gateway_url = %args.gateway_url,
        allowed_roots = %args.allowed_roots,
        "starting relay-worker"
    );

    let allowed_roots = AllowedRoots::from_env_value(&args.allowed_roots);
    if allowed_roots.roots().is_empty() {
        tracing::warn!(
            "no allowed roots resolved from RELAY_ALLOWED_ROOTS — every path-valued \
             parameter will be rejected by the path-jail gate"
        );
    }

    let emergency_stop = EmergencyStop::new();
    let validator = Validator::new(emergency_stop.clone(), allowed_roots);
    let rate_limiter = RateLimiter::new(
        args.rate_limit_max,
        std::time::Duration::from_secs(args.rate_limit_window_secs),
    );
    let locks = LockRegistry::new();
    let audit = AuditLogger::spawn(args.audit_log.clone());
    let executors = relay_executors::ExecutorRegistry::new();

    let router = Arc::new(Router::new(
        validator,
        emergency_stop,
        rate_limiter,
        locks,
        audit,
        executors,
    ));

    let identity = WorkerIdentity {
        auth_token: args.auth_token,
        agent_version: AGENT_VERSION.to_string(),
        capabilities: relay_protocol::action::capabilities(),
    };

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining connection");
        shutdown_signal.cancel();
    });

    ws_client::run(args.gateway_url, identity, router, shutdown).await;

    tracing::info!("relay-worker exiting");
    Ok(())
}

/// SIGINT/SIGTERM on Unix; `Ctrl+C` on Windows (spec §6: "Windows falls
/// back to `SIGINT` via signal handler").
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(windows)]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
