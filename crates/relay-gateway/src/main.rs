//! Public-facing relay gateway: the HTTP API, the single-Worker websocket
//! acceptor, and the idempotency store that ties retried caller
//! submissions to at-most-one upstream dispatch (spec §4.H, §4.I).

use clap::Parser;
use relay_gateway::config::Args;
use relay_gateway::idempotency::IdempotencyStore;
use relay_gateway::server::{build_router, AppState};
use relay_gateway::session::GatewayLink;
use relay_ssh::{HealthProbe, SshExecutor};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "relay_gateway={},relay_ssh={},relay_policy={}",
            args.log_level, args.log_level, args.log_level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(addr = %args.addr, force_ssh = args.force_ssh, "starting relay-gateway");

    let idempotency = Arc::new(IdempotencyStore::open(&args.idempotency_db)?);
    idempotency.spawn_cleanup_task(args.idempotency_retention());

    let link = GatewayLink::new();

    let ssh_fallback = args.ssh_fallback_config();
    let (ssh, ssh_health, ssh_target) = match ssh_fallback {
        Some(cfg) => {
            let target = format!("{}:{}", cfg.ssh.host, cfg.ssh.port);
            let health = HealthProbe::new(cfg.ssh.clone(), cfg.platform);
            let executor = Arc::new(SshExecutor::new(cfg.ssh, cfg.platform, cfg.allowed_roots));
            (Some(executor), Some(health), Some(target))
        }
        None => {
            if args.force_ssh {
                tracing::warn!(
                    "RELAY_FORCE_SSH is set but no SSH fallback target is configured; \
                     every /action submission will fail with 503 until RELAY_SSH_HOST, \
                     RELAY_SSH_USER and RELAY_SSH_KEY_PATH are all set"
                );
            }
            (None, None, None)
        }
    };

    let state = AppState {
        link,
        idempotency,
        auth_token: Arc::from(args.auth_token.as_str()),
        force_ssh: args.force_ssh,
        ssh,
        ssh_health,
        ssh_target,
    };

    let app = build_router(state);
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining connections");
        shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
    });

    match args.tls_pair() {
        Some((cert, key)) => {
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key).await?;
            tracing::info!(cert = %cert.display(), "serving wss/https");
            axum_server::bind_rustls(args.addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            tracing::warn!(
                "no TLS certificate configured (RELAY_TLS_CERT/RELAY_TLS_KEY); \
                 serving plain ws/http — fine for loopback or a trusted tunnel, \
                 unsafe over an untrusted network"
            );
            axum_server::bind(args.addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    tracing::info!("relay-gateway exiting");
    Ok(())
}

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
