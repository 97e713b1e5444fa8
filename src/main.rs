//! venue-hindex - per-volume h-index of conference proceedings
//!
//! Scrapes paper lists from dblp, looks up each paper's citation count on
//! Google Scholar through a Chrome browser driven over the DevTools protocol,
//! and aggregates the counts into one h-index per venue volume.
//!
//! ## Usage
//!
//! The speech recognizer command goes after `--`; everything there belongs to
//! it, and the WAV path is appended as its last argument.
//!
//! ```bash
//! venue-hindex scrape --settings scrape_settings.txt -- whisper-cli -m base.en
//! venue-hindex aggregate --input raw_data.csv
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};
use venue_hindex::{
    challenge::{ChallengeConfig, ChallengeSolver},
    chrome::{BrowserOptions, ChromeSession},
    dblp::{DblpClient, DEFAULT_DBLP_URL},
    hindex,
    http::{HttpClient, USER_AGENT},
    pacing::Jitter,
    pipeline::Pipeline,
    scholar::{CitationFetcher, FetcherConfig, DEFAULT_SCHOLAR_URL},
    session::PageFetcher,
    settings,
    store::ResultStore,
    transcribe::CommandTranscriber,
};

// ============================================================================
// CLI Definition
// ============================================================================

/// Per-volume h-index of conference proceedings
#[derive(Parser)]
#[command(name = "venue-hindex")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Write logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape citation counts into the raw dataset
    Scrape(ScrapeArgs),

    /// Compute per-volume h-indices from the raw dataset
    Aggregate {
        /// Raw dataset file
        #[arg(short, long, default_value = "raw_data.csv")]
        input: PathBuf,

        /// Summary file
        #[arg(short, long, default_value = "conferences_h_indices.csv")]
        output: PathBuf,
    },

    /// Print the venues and volumes of a settings file
    Targets {
        /// Scrape settings file
        #[arg(short, long, default_value = "scrape_settings.txt")]
        settings: PathBuf,
    },
}

#[derive(clap::Args)]
struct ScrapeArgs {
    /// Scrape settings file
    #[arg(short, long, default_value = "scrape_settings.txt")]
    settings: PathBuf,

    /// Raw dataset file
    #[arg(short, long, default_value = "raw_data.csv")]
    output: PathBuf,

    /// Chrome executable; autodetected when unset
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// DevTools websocket URL of a running browser to use instead of launching one
    #[arg(long)]
    connect: Option<String>,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    /// dblp conference root
    #[arg(long, default_value = DEFAULT_DBLP_URL)]
    dblp_url: String,

    /// Google Scholar base URL (mirror sites allowed)
    #[arg(long, default_value = DEFAULT_SCHOLAR_URL)]
    scholar_url: String,

    /// Browser and HTTP user agent
    #[arg(long, default_value = USER_AGENT)]
    user_agent: String,

    /// Proxy URL for dblp and audio downloads (e.g., http://127.0.0.1:7890)
    #[arg(long)]
    proxy: Option<String>,

    /// Minimum pause between Scholar queries, in seconds
    #[arg(long, default_value_t = 3.0)]
    min_delay: f64,

    /// Maximum pause between Scholar queries, in seconds
    #[arg(long, default_value_t = 7.0)]
    max_delay: f64,

    /// ffmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Directory for challenge audio files
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Ignore an existing raw dataset instead of resuming it
    #[arg(long)]
    fresh: bool,

    /// Speech recognizer command after `--`; the WAV path is appended as last argument
    #[arg(last = true, required = true, value_name = "RECOGNIZER")]
    recognizer: Vec<String>,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    match cli.command {
        Commands::Scrape(args) => run_scrape(args).await,
        Commands::Aggregate { input, output } => run_aggregate(input, output),
        Commands::Targets { settings } => print_targets(settings),
    }
}

// ============================================================================
// Scrape
// ============================================================================

async fn run_scrape(args: ScrapeArgs) -> Result<()> {
    let targets = settings::load(&args.settings)?;
    if targets.is_empty() {
        println!("No venues configured in {:?}.", args.settings);
        return Ok(());
    }

    let http: Arc<dyn PageFetcher> = Arc::new(
        HttpClient::new(&args.user_agent, args.proxy.as_deref())
            .context("Failed to build HTTP client")?,
    );
    let work_dir = args
        .work_dir
        .unwrap_or_else(|| std::env::temp_dir().join("venue-hindex"));
    let transcriber = Arc::new(CommandTranscriber::new(args.ffmpeg, args.recognizer, work_dir)?);
    let jitter = Jitter::from_secs_f64(args.min_delay, args.max_delay);

    let store = if args.fresh {
        ResultStore::new(args.output.clone())
    } else {
        ResultStore::open(args.output.clone())
            .with_context(|| format!("Failed to read {:?}", args.output))?
    };

    let browser = BrowserOptions {
        user_agent: Some(args.user_agent.clone()),
        headless: args.headless,
        executable: args.chrome,
        connect_url: args.connect,
    };
    let session = ChromeSession::start(&browser)
        .await
        .context("Failed to start a browser session")?;

    let solver = ChallengeSolver::new(http.clone(), transcriber, ChallengeConfig::default())
        .with_jitter(jitter);
    let fetcher_config = FetcherConfig {
        base_url: args.scholar_url,
        ..Default::default()
    };
    let fetcher = CitationFetcher::new(session, solver, fetcher_config).with_jitter(jitter);
    let dblp = DblpClient::new(http, &args.dblp_url);

    let mut pipeline = Pipeline::new(dblp, fetcher, store);
    let outcome = pipeline.run(&targets).await;
    let rows = pipeline.store().len();

    if let Err(e) = pipeline.into_session().quit().await {
        error!(error = %e, "Failed to close the browser session");
    }

    if let Err(e) = &outcome {
        if e.is_fatal_challenge() {
            error!(error = %e, rows = rows, "Scholar stopped answering; rerun later to resume");
        }
    }
    let summary = outcome.context("Scrape aborted")?;
    println!(
        "Scraped {} volumes ({} already done, {} listed twice): {} papers, {} without identifier, {} not on Scholar.",
        summary.volumes_scraped,
        summary.volumes_skipped,
        summary.duplicates,
        summary.papers,
        summary.unresolved,
        summary.not_indexed
    );
    println!("Saved {} rows to {:?}", rows, args.output);
    Ok(())
}

// ============================================================================
// Aggregate
// ============================================================================

fn run_aggregate(input: PathBuf, output: PathBuf) -> Result<()> {
    info!(input = ?input, "Calculating h-index");
    let stats = hindex::run(&input, &output)
        .with_context(|| format!("Failed to aggregate {:?}", input))?;
    println!("Saved {} volumes to {:?}", stats.len(), output);
    Ok(())
}

fn print_targets(path: PathBuf) -> Result<()> {
    let targets = settings::load(&path)?;
    for target in &targets {
        println!("{} ({})", target.venue, target.mode);
        for volume in &target.volumes {
            println!("  {}", volume);
        }
    }
    println!(
        "{} venues, {} volumes",
        targets.len(),
        targets.iter().map(|t| t.volumes.len()).sum::<usize>()
    );
    Ok(())
}
