//! # rekon
//!
//! Command-line entry point. `invoke` runs the dispatcher against in-memory
//! backends and delivers the callback over HTTP; `normalize` and `config`
//! are offline helpers.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rekon::fixtures;
use rekon::rekon_callback::{HttpTransport, ResponseDelivery};
use rekon::rekon_reconciler::{NormalizeRules, normalize};
use rekon::rekon_resources::{InMemoryRemotes, default_registry};
use rekon::{AppConfig, Dispatcher};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Invoke {
            event,
            remaining_ms,
            config,
            fixtures,
        } => invoke(&event, remaining_ms, config.as_deref(), fixtures.as_deref()).await,
        Commands::Normalize { input } => normalize_config(&input),
        Commands::Config => {
            let rendered = AppConfig::default()
                .to_toml()
                .context("Failed to render default configuration")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Read a file, or stdin for `-`.
fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read {source}"))
    }
}

async fn invoke(
    event: &str,
    remaining_ms: u64,
    config: Option<&Path>,
    fixture_file: Option<&Path>,
) -> Result<()> {
    let config = AppConfig::load(config).context("Configuration is invalid")?;
    let text = read_input(event)?;

    let remotes = InMemoryRemotes::new();
    if let Some(path) = fixture_file {
        let fixture_text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures {}", path.display()))?;
        let count = fixtures::seed(&remotes, &fixture_text)
            .await
            .context("Fixtures are invalid")?;
        info!(count, "Backends seeded");
    }

    let transport = HttpTransport::new().context("HTTP transport unavailable")?;
    let delivery = ResponseDelivery::new(Arc::new(transport), config.delivery);
    let dispatcher = Dispatcher::new(default_registry(&remotes.remotes()), config.engine, delivery);

    let report = dispatcher
        .dispatch_json(&text, Duration::from_millis(remaining_ms))
        .await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render report")?
    );
    Ok(())
}

fn normalize_config(input: &str) -> Result<()> {
    let text = read_input(input)?;
    let config: serde_json::Value =
        serde_json::from_str(&text).context("Input is not a JSON document")?;
    let normalized = normalize(&config, &NormalizeRules::distribution());
    println!(
        "{}",
        serde_json::to_string_pretty(&normalized).context("Failed to render result")?
    );
    Ok(())
}
