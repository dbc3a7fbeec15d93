use anyhow::{Context, Result};
use clap::Parser;
use devpipe::banner::Banner;
use devpipe::cli::Cli;
use devpipe::{
    create_transport_client, ClientConfig, FileIdentityStore, HttpForwarder, IdentityStore,
    MemoryIdentityStore, TunnelClient,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG 优先于 --log-level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("devpipe v{}", env!("CARGO_PKG_VERSION"));

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let config = load_config(&cli)?;

    let store: Arc<dyn IdentityStore> = if cli.ephemeral {
        info!("Ephemeral mode: tunnel identity will not be saved");
        Arc::new(MemoryIdentityStore::new())
    } else {
        let path = config.identity_path();
        info!("Using tunnel identity file {}", path.display());
        Arc::new(FileIdentityStore::new(path))
    };

    if cli.clear_config {
        match store.clear() {
            Ok(()) => info!("Cleared saved tunnel identity"),
            Err(e) => warn!("Failed to clear saved tunnel identity: {}", e),
        }
    }

    let transport = create_transport_client(&config.server_url)
        .context("Failed to create transport client")?;
    let forwarder = HttpForwarder::new(config.local_timeout(), config.follow_redirects)
        .context("Failed to create local HTTP client")?;

    let client = Arc::new(TunnelClient::new(
        &config,
        transport,
        store,
        Arc::new(forwarder),
    ));

    let conn = client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to relay {}", config.server_url))?;

    Banner {
        server_url: &config.server_url,
        tunnel_id: conn.tunnel_id(),
        port: conn.port(),
        uuid: conn.uuid(),
    }
    .print()
    .context("Failed to print banner")?;

    let runner = client.clone();
    let mut run = tokio::spawn(async move { runner.run(conn).await });

    tokio::select! {
        result = &mut run => {
            let result = result.context("Tunnel task panicked")?;
            if let Err(e) = &result {
                error!("Tunnel stopped: {}", e);
            }
            result.context("Tunnel connection could not be restored")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            client.shutdown();
            if let Ok(Err(e)) = run.await {
                warn!("Tunnel ended with error during shutdown: {}", e);
            }
        }
    }

    Ok(())
}

/// 合并配置：文件 < 环境变量 < 命令行
fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading client configuration from: {}", path);
            ClientConfig::from_file(path)?
        }
        None => ClientConfig::default(),
    };

    config.apply_env();

    if let Some(port) = &cli.port {
        config.local_port = port.clone();
    }
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
