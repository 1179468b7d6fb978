use alicloud_cpi_action::{Cpi, Request, Response};
use alicloud_cpi_config::{find_config_file, load_config};
use alicloud_cpi_core::EcsClient;
use alicloud_cpi_ecs::{Aliyun, AliyunEcs};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Reads one CPI request from stdin and writes the response to stdout.
#[derive(Parser)]
#[command(name = "alicloud-cpi", version)]
#[command(about = "BOSH cloud provider interface for Alibaba Cloud ECS", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Abort any wait still in progress after this many seconds
    #[arg(long, env = "ALICLOUD_CPI_TIMEOUT_SECS", value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// aliyun CLI executable
    #[arg(long, env = "ALICLOUD_CPI_ALIYUN_BIN", default_value = "aliyun")]
    aliyun_bin: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the response, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read the request from stdin")?;

    let response = match serde_json::from_str::<Request>(&input) {
        Ok(request) => handle(&cli, &request).await?,
        Err(e) => {
            tracing::error!("Malformed request: {}", e);
            Response::invalid_call(format!("malformed request: {e}"))
        }
    };

    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

async fn handle(cli: &Cli, request: &Request) -> anyhow::Result<Response> {
    let path = find_config_file(cli.config.as_deref())?;
    let config = load_config(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let config = Arc::new(config);

    let alicloud = config.alicloud();
    let aliyun = Aliyun::new(
        &alicloud.region_id,
        &alicloud.access_key_id,
        alicloud.access_key_secret.expose(),
    )
    .with_binary(&cli.aliyun_bin);
    let client: Arc<dyn EcsClient> = Arc::new(AliyunEcs::new(aliyun));
    let cpi = Cpi::new(config, client);

    let cancel = CancellationToken::new();
    let watchdog = tokio::spawn(watchdog(cancel.clone(), cli.timeout_secs));
    let response = cpi.handle(request, cancel).await;
    watchdog.abort();

    Ok(response)
}

/// Cancel the request on Ctrl-C or once the overall timeout expires
async fn watchdog(cancel: CancellationToken, timeout_secs: Option<u64>) {
    let expired = async {
        match timeout_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = interrupted => {
            tracing::warn!("Interrupted, abandoning the current wait");
        }
        () = expired => {
            tracing::warn!("Request timeout expired, abandoning the current wait");
        }
    }
    cancel.cancel();
}
