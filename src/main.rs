use anyhow::Context as _;
use kvmux::{server, web, Config, Service};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Config path from the first argument, else KVMUX_CONFIG
fn load_config() -> anyhow::Result<Config> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("KVMUX_CONFIG").ok());

    match path {
        Some(path) => Config::load_from(&path),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("kvmux starting...");
    info!("Detected {} CPU cores", num_cpus::get());

    let service = Arc::new(Service::from_config(&config).context("Failed to initialize storages")?);

    // Start RPC server in background task
    let rpc_service = service.clone();
    let rpc_addr = config.rpc_addr.clone();
    let mut rpc_handle = tokio::spawn(async move {
        info!("Starting RPC server on {}", rpc_addr);
        if let Err(e) = server::run(&rpc_addr, rpc_service).await {
            error!("RPC server error: {:#}", e);
        }
    });

    // Start admin server in background task
    let web_service = service.clone();
    let admin_addr = config.admin_addr.clone();
    let mut web_handle = tokio::spawn(async move {
        info!("Starting admin server on {}", admin_addr);
        if let Err(e) = web::run_web_server(&admin_addr, web_service).await {
            error!("Admin server error: {:#}", e);
        }
    });

    // Wait for ctrl-c or a server dying
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            info!("Interrupt received");
        }
        _ = &mut rpc_handle => error!("RPC server stopped"),
        _ = &mut web_handle => error!("Admin server stopped"),
    }

    service.shutdown().await?;
    for handle in [rpc_handle, web_handle] {
        if !handle.is_finished() {
            let _ = handle.await;
        }
    }

    info!("kvmux stopped");
    Ok(())
}
