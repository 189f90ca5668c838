//! Export the merged JWK Set of every configured remote
//!
//! Usage:
//!   JWKSET_URLS=https://issuer.example/.well-known/jwks.json cargo run --bin jwkset-export
//!   cargo run --bin jwkset-export -- --private
//!
//! Prints public key material unless `--private` is given. Logs go to
//! stderr, as JSON when `LOG_FORMAT=json`.

use anyhow::{bail, Context, Result};
use jwkset::{CancellationToken, KeySetClient, KeyStore};
use jwkset_config::ClientConfig;
use jwkset_logging::{init_logging, LogFormat};
use std::env;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClientConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    let format: LogFormat = config
        .log_format()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid LOG_FORMAT: {}", e))?;
    init_logging("jwkset-export", config.log_level(), format);

    let private = env::args().skip(1).any(|arg| arg == "--private");
    if config.urls.is_empty() {
        bail!("No JWK Set URLs configured; set JWKSET_URLS");
    }

    info!(urls = config.urls.len(), private, "Loading JWK Sets");

    let cancel = CancellationToken::new();
    let client = KeySetClient::from_config(&config, cancel.clone())
        .await
        .context("Failed to create JWK Set client")?;

    let set = if private {
        client.json_private().await
    } else {
        client.json_public().await
    }
    .context("Failed to export JWK Set")?;

    println!("{}", serde_json::to_string_pretty(&set)?);

    cancel.cancel();
    Ok(())
}
