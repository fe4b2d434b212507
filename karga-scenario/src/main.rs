use anyhow::Context;
use clap::Parser;
use karga_scenario::{
    config::{Overrides, Settings},
    ScenarioReport,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run the feed service scenario with many virtual users.
///
/// Credentials and tokens are read from the settings files or from
/// `KARGA_TOKEN`, `KARGA_CREDENTIALS__USERNAME` and `KARGA_CREDENTIALS__PASSWORD`.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    /// Settings file, `karga-scenario.toml` is used when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra settings file for credentials and tokens.
    #[arg(long)]
    secrets: Option<PathBuf>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "karga_scenario=info,reqwest=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref(), cli.secrets.as_deref(), &cli.overrides)
        .context("loading settings")?;
    let runner = settings.runner().context("building scenario")?;

    let stop = runner.stop_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, stopping virtual users");
                stop.cancel();
            }
            Err(err) => warn!("Cannot listen for Ctrl+C: {err}"),
        }
    });

    let results = runner.run().await.context("running scenario")?;
    let report = ScenarioReport::from(results);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report:#?}");
    }
    Ok(())
}
