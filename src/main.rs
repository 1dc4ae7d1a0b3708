//! Site-Atlas main entry point
//!
//! This is the command-line interface for the Site-Atlas website mirror.

use anyhow::{bail, Context};
use clap::Parser;
use site_atlas::config::{compute_config_hash, read_config, validate, Config};
use site_atlas::crawler::Coordinator;
use site_atlas::output::{print_summary, FsSink, TracingReporter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Site-Atlas: a polite website mirror
///
/// Site-Atlas crawls a website from a seed URL, downloads its pages and the
/// stylesheets, scripts, images and fonts they use, and writes a map of the
/// site as JSON and as a readable listing.
#[derive(Parser, Debug)]
#[command(name = "site-atlas")]
#[command(version)]
#[command(about = "A polite website mirror and mapper", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults are used without one)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// URL to start crawling from (overrides the config file)
    #[arg(long, value_name = "URL")]
    seed: Option<String>,

    /// Directory to write the mirror to
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Maximum page depth from the seed
    #[arg(long, value_name = "N")]
    max_depth: Option<u32>,

    /// Safety ceiling on the number of items fetched
    #[arg(long, value_name = "N")]
    max_items: Option<usize>,

    /// Also fetch pages and assets on other origins
    #[arg(long)]
    follow_external: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = load(&cli)?;
    validate(&config).context("Invalid configuration")?;

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    handle_crawl(config).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("site_atlas=info,warn"),
            1 => EnvFilter::new("site_atlas=debug,info"),
            2 => EnvFilter::new("site_atlas=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads the config file (if any) and applies command-line overrides
fn load(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let config = read_config(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let hash = compute_config_hash(path)?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        None => Config::default(),
    };

    if let Some(seed) = &cli.seed {
        config.crawler.seed_url = seed.clone();
    }
    if config.crawler.seed_url.trim().is_empty() {
        bail!("No seed URL: pass --seed or set crawler.seed-url in a config file");
    }

    if let Some(output) = &cli.output {
        config.output.directory = output.display().to_string();
    }
    if let Some(max_depth) = cli.max_depth {
        config.crawler.max_depth = max_depth;
    }
    if let Some(max_items) = cli.max_items {
        config.crawler.max_total_items = max_items;
    }
    if cli.follow_external {
        config.crawler.follow_external_links = true;
    }

    Ok(config)
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Site-Atlas Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Seed: {}", config.crawler.seed_url);
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Max items: {}", config.crawler.max_total_items);
    println!("  Follow external: {}", config.crawler.follow_external_links);
    let kinds: Vec<&str> = config
        .crawler
        .allowed_asset_kinds
        .iter()
        .map(|kind| kind.as_str())
        .collect();
    println!("  Asset kinds: {}", kinds.join(", "));
    println!("  Workers: {}", config.crawler.max_workers);

    println!("\nPoliteness:");
    println!(
        "  Per-origin concurrency: {}",
        config.throttle.max_concurrent_per_domain
    );
    println!(
        "  Minimum request interval: {}ms",
        config.throttle.min_request_interval_ms
    );
    println!(
        "  Retries: {} (backoff {}ms..{}ms)",
        config.retry.max_retries, config.retry.initial_backoff_ms, config.retry.max_backoff_ms
    );
    println!("  User agent: {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory);
    println!("  Map: {}", config.output.map_file);
    println!("  Structure: {}", config.output.structure_file);

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let directory = PathBuf::from(&config.output.directory);
    let sink = Arc::new(FsSink::new(&directory));
    let coordinator = Coordinator::new(config, sink, Arc::new(TracingReporter))
        .context("Failed to initialize crawl")?;

    let shutdown = coordinator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl+C, finishing in-flight requests...");
            eprintln!("Press Ctrl+C again to force quit");
            shutdown.cancel();

            // Second Ctrl+C skips the grace period
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nForce quit requested, exiting immediately...");
                std::process::exit(130);
            }
        }
    });

    let report = coordinator
        .run()
        .await
        .context("Failed to write the site map")?;

    println!();
    print_summary(&report.summary);
    println!("\nMirror written to: {}", directory.display());

    Ok(())
}
