//! doh-proxy - Entry point.
//!
//! This binary answers classic DNS queries on UDP and TCP by forwarding them
//! through an optional primary DNS server, a DNS-over-HTTPS JSON endpoint and
//! an optional fallback DNS server, in that order.

use std::borrow::Cow;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use doh_proxy::config::Config;
use doh_proxy::dns::{DispatchChain, DohResolver, UpstreamResolver};
use doh_proxy::server::DnsServer;

/// Resolve once SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl-C received, shutting down..."),
        () = terminate => info!("SIGTERM received, shutting down..."),
    }
}

/// Wait for a shutdown signal or the end of a listener, then stop both.
async fn wait_for_shutdown(
    mut udp_handle: JoinHandle<doh_proxy::Result<()>>,
    mut tcp_handle: JoinHandle<doh_proxy::Result<()>>,
) {
    tokio::select! {
        () = shutdown_signal() => {}
        result = &mut udp_handle => log_listener_exit("UDP", result),
        result = &mut tcp_handle => log_listener_exit("TCP", result),
    }

    udp_handle.abort();
    tcp_handle.abort();

    info!("Shutdown complete.");
}

fn log_listener_exit(
    listener: &str,
    result: std::result::Result<doh_proxy::Result<()>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => info!("{listener} listener stopped"),
        Ok(Err(err)) => error!("{listener} listener failed: {err}"),
        Err(err) => error!("{listener} listener task failed: {err}"),
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed("config.toml"));
    let config = Config::load(config_path.as_ref()).context("Failed to load configuration")?;

    // Initialize metrics (must be done early, before any metrics are recorded)
    doh_proxy::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    info!("Starting DoH proxy...");
    info!("DoH endpoint: {}", config.doh_endpoint);

    let doh = DohResolver::new(config.doh_endpoint.as_str(), config.upstream_timeout())
        .context("Failed to create DoH resolver")?;
    let chain_config = config
        .chain_config()
        .context("Invalid fallthrough configuration")?;
    let mut chain = DispatchChain::new(doh, chain_config);

    if let Some(addr) = config.primary_addr().context("Invalid primary DNS")? {
        info!("Primary DNS: {addr}");
        chain = chain.with_primary(UpstreamResolver::new(addr, config.upstream_timeout()));
    }
    if let Some(addr) = config.fallback_addr().context("Invalid fallback DNS")? {
        info!("Fallback DNS: {addr}");
        chain = chain.with_fallback(UpstreamResolver::new(addr, config.upstream_timeout()));
    }

    let server = DnsServer::new(chain, config.tcp_idle_timeout());

    let socket = UdpSocket::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind UDP socket on {}", config.listen))?;
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {}", config.listen))?;
    info!("Listening on {}", config.listen);

    let udp_server = server.clone();
    let udp_handle = tokio::spawn(async move { udp_server.serve_udp(socket).await });
    let tcp_handle = tokio::spawn(async move { server.serve_tcp(listener).await });

    wait_for_shutdown(udp_handle, tcp_handle).await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    run().await
}
