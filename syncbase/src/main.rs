use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use syncbase::config::Config;
use syncbase::Instance;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (SYNCBASE_LOG_JSON=1), human-readable otherwise.
    let json_logs = std::env::var("SYNCBASE_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("syncbase=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::parse();
    let data_dir = config.resolved_data_dir();
    tracing::info!(?data_dir, "opening instance");

    let instance = Instance::open(&data_dir, &config.seed)?;

    if let Some(token) = config.join {
        instance.claim_invite(&token)?;
        tracing::info!("claimed invite, awaiting sync");
    } else if !instance.is_initialized()? {
        let name = config.name.unwrap_or_else(|| "My Server".to_string());
        instance.initialize(&name, None)?;
        tracing::info!(%name, "initialized new server");
    }

    if let Some(info) = instance.get_server_info()? {
        tracing::info!(server = %info.name, "ready");
    }

    instance.close()?;
    Ok(())
}
