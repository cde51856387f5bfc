//! Carrier gateway server.
//!
//! Wires the handler fleet, the HTTP front end and the sender pool around a
//! backend. This binary embeds the in-memory backend for development and
//! testing; production deployments link a concrete backend crate in its
//! place.
//!
//! Exit codes: 0 on clean shutdown, 1 on init failure, 2 on unrecoverable
//! runtime failure.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

use carrier_backend::{Backend, MemBackend};
use carrier_common::{Channel, ChannelType};
use carrier_config::AppConfig;
use carrier_gateway::handler::HandlerContext;
use carrier_gateway::{create_router, AppState, HandlerRegistry};
use carrier_handlers::register_all;
use carrier_sender::{SenderPool, SenderPoolConfig};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    carrier_common::logging::init_logging("carrier");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let (registry, state, pool) = match build(&config) {
        Ok(parts) => parts,
        Err(e) => {
            error!(error = %e, "Initialization failed");
            std::process::exit(1);
        }
    };

    info!(
        channel_types = registry.len(),
        workers = config.sender.workers,
        domain = %config.domain,
        "Carrier initialized"
    );

    if let Err(e) = run(&config, state, &pool).await {
        error!(error = %e, "Unrecoverable runtime failure");
        std::process::exit(2);
    }

    std::process::exit(0);
}

type Parts = (Arc<HandlerRegistry>, AppState, SenderPool);

fn build(config: &AppConfig) -> Result<Parts> {
    let mut registry = HandlerRegistry::new();
    register_all(&mut registry).context("handler registration")?;
    let registry = Arc::new(registry);

    let backend = Arc::new(MemBackend::new());
    if config.dev_mode {
        seed_dev_channels(&backend);
    } else {
        warn!("No external backend linked; running with the embedded in-memory backend");
    }

    let ctx = Arc::new(HandlerContext::new(
        backend as Arc<dyn Backend>,
        Arc::new(config.clone()),
    ));

    let pool = SenderPool::new(
        registry.clone(),
        ctx.clone(),
        SenderPoolConfig {
            workers: config.sender.workers,
            shutdown_grace: std::time::Duration::from_secs(config.sender.shutdown_grace_secs),
        },
    );

    let state = AppState {
        registry: registry.clone(),
        ctx,
    };

    Ok((registry, state, pool))
}

async fn run(config: &AppConfig, state: AppState, pool: &SenderPool) -> Result<()> {
    pool.start();

    let router = create_router(state);
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "Listening for provider webhooks");

    axum_serve(listener, router).await?;

    info!("Shutdown signal received, draining sender pool");
    pool.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn axum_serve(listener: TcpListener, router: axum::Router) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Demo channels so local webhooks can be exercised end to end.
fn seed_dev_channels(backend: &MemBackend) {
    let bandwidth = Channel::new(
        Uuid::parse_str("8eb23e93-5ecb-45ba-b726-3b064e0c56ab").unwrap(),
        ChannelType::new("BW").unwrap(),
        "2020",
        &["tel"],
    )
    .with_country("US")
    .with_config("username", serde_json::json!("dev"))
    .with_config("password", serde_json::json!("dev"))
    .with_config("account_id", serde_json::json!("1234"))
    .with_config("application_id", serde_json::json!("dev-app"));

    let telegram = Channel::new(
        Uuid::parse_str("bd78be20-9a5a-4ec5-b9b1-4b8dbd32a3b3").unwrap(),
        ChannelType::new("TG").unwrap(),
        "carrier_dev_bot",
        &["telegram"],
    )
    .with_config("auth_token", serde_json::json!("dev-bot-token"));

    info!(
        bandwidth = %bandwidth.uuid,
        telegram = %telegram.uuid,
        "Seeded development channels"
    );
    backend.add_channel(bandwidth);
    backend.add_channel(telegram);
}
