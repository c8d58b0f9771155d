//! dropmirror CLI
//!
//! Runs one full reconciliation pass, then optionally keeps watching the
//! directory and applies each change as it happens.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropmirror::config::{default_config_path, normalize_local_dir};
use dropmirror::{Mirror, MirrorConfig, PassStatus};

#[derive(Parser)]
#[command(name = "dropmirror")]
#[command(about = "Mirror a local directory into a Dropbox folder")]
#[command(version)]
struct Args {
    /// Config file (.toml, or a legacy secret .json)
    #[arg(short, long, env = "DROPMIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Dropbox access token
    #[arg(long, env = "DROPBOX_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Local directory to mirror
    #[arg(short, long, env = "DROPMIRROR_DIR")]
    dir: Option<String>,

    /// Keep running after the full pass and apply live changes
    #[arg(short, long)]
    watch: bool,

    /// Print the plan without uploading or deleting anything
    #[arg(long, conflicts_with = "watch")]
    dry_run: bool,

    /// Actions run at once within a phase
    #[arg(long)]
    concurrency: Option<usize>,

    /// Seconds allowed for fingerprinting one file
    #[arg(long)]
    fingerprint_timeout: Option<u64>,
}

fn load_config(args: &Args) -> anyhow::Result<MirrorConfig> {
    let path = args.config.clone().or_else(|| {
        default_config_path().filter(|p| p.exists())
    });

    let mut config = match path {
        Some(path) => MirrorConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => MirrorConfig::default(),
    };

    if let Some(token) = &args.token {
        config.access_token = token.clone();
    }
    if let Some(dir) = &args.dir {
        config.local_dir = normalize_local_dir(dir);
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(secs) = args.fingerprint_timeout {
        config.fingerprint_timeout_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let mirror = Mirror::from_config(&config)?;

    if args.dry_run {
        let plan = mirror.plan().await.context("failed to compute plan")?;
        if plan.is_empty() {
            println!("Nothing to do");
        }
        for action in plan.actions() {
            println!("{}", action);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let report = mirror.full_sync().await.context("full sync failed")?;
    for failure in report.failures() {
        eprintln!(
            "{}: {}",
            failure.action,
            failure.error.as_deref().unwrap_or_default()
        );
    }

    if args.watch {
        mirror.watch().await?;
        return Ok(ExitCode::SUCCESS);
    }

    Ok(match report.status() {
        PassStatus::Finished => ExitCode::SUCCESS,
        PassStatus::FinishedWithErrors => ExitCode::FAILURE,
    })
}
