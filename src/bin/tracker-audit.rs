use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracker_audit::{AuditorConfig, FindingEvent, TrackerAuditor};

/// Scan a page for third-party requests and classify them with Tracker Radar.
#[derive(Debug, Parser)]
#[command(name = "tracker-audit", version)]
struct Cli {
    /// URL or hostname to scan.
    url: String,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tracker Radar region directory (US, AU, ...).
    #[arg(long)]
    region: Option<String>,

    /// Navigation timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print findings as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => AuditorConfig::from_path(path)?,
        None => AuditorConfig::default(),
    };

    let mut builder = TrackerAuditor::builder().with_config(config);
    if let Some(region) = cli.region {
        builder = builder.with_region(region);
    }
    if let Some(secs) = cli.timeout_secs {
        builder = builder.with_navigation_timeout(Duration::from_secs(secs));
    }
    let auditor = Arc::new(builder.build()?);

    let (tx, mut rx) = mpsc::unbounded_channel::<FindingEvent>();
    let scan = auditor.spawn_scan(&cli.url, Arc::new(tx))?;

    while let Some(finding) = rx.recv().await {
        if cli.json {
            println!("{}", serde_json::to_string(&finding)?);
        } else {
            println!("{}", finding.domain);
            println!("  owner:      {}", finding.owner);
            println!("  categories: {}", finding.categories);
            println!("  cookies:    {}", finding.cookies);
        }
    }

    let report = scan.await?;
    if let Some(error) = &report.error {
        eprintln!("scan failed: {error}");
        return Ok(ExitCode::FAILURE);
    }
    eprintln!(
        "{} third-party domain(s), {} tracker finding(s), {} without metadata, {} lookup failure(s)",
        report.third_party_domains.len(),
        report.findings.len(),
        report.not_found,
        report.failed
    );
    Ok(ExitCode::SUCCESS)
}
