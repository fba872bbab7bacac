//! galena-triage - CLI entry point
//!
//! Thin shell over the pipeline library: resolve configuration, run one
//! triage pass over the supplied container, print the summary. Report
//! writers and the review UI consume the same library surface.

use anyhow::Result;
use clap::Parser;
use galena_common::config::{self, parse_kinds_list, parse_utc_offset};
use galena_triage::TriagePipeline;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "galena-triage", version, about = "Extract canonical artifacts from a mobile device backup")]
struct Cli {
    /// Path to the backup container (iOS backup directory, extraction
    /// tree, or ZIP archive)
    container: PathBuf,

    /// Configuration file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated artifact kinds to extract (default: all)
    #[arg(long)]
    kinds: Option<String>,

    /// Device timezone override, e.g. "+05:30" or "UTC"
    #[arg(long)]
    timezone: Option<String>,

    /// Hide implausible-timestamp records from listings (default: shown, flagged)
    #[arg(long)]
    exclude_implausible: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    summary_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GALENA_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Layering: defaults ← TOML ← env ← CLI flags
    let mut config = config::load(cli.config.as_deref())?;
    if let Some(kinds) = &cli.kinds {
        let list: Vec<String> = kinds.split(',').map(str::to_string).collect();
        config.kinds = parse_kinds_list(&list)?;
    }
    if let Some(tz) = &cli.timezone {
        config.device_offset = Some(parse_utc_offset(tz)?);
    }
    if cli.exclude_implausible {
        config.include_implausible = false;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting galena-triage");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight records");
                cancel.cancel();
            }
        });
    }

    let pipeline = TriagePipeline::new(config);
    let run = pipeline.run(&cli.container, cancel).await?;

    let profile = &run.profile;
    info!(
        device = profile.device_name.as_deref().unwrap_or("unknown"),
        model = profile.model.as_deref().unwrap_or("unknown"),
        os_version = profile.os_version.as_deref().unwrap_or("unknown"),
        "Device profile"
    );

    let summary = run.store.summary();
    for (kind, count) in &summary.records_by_kind {
        info!(kind = kind.as_str(), records = count, "Extracted");
    }
    for source_diag in &summary.source_diagnostics {
        warn!(
            kind = source_diag.kind.as_str(),
            source = %source_diag.source,
            detail = %source_diag.diagnostic.detail,
            "Source diagnostic"
        );
    }

    if cli.summary_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
