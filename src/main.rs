//! Sumi-Trawl main entry point
//!
//! This is the command-line interface for the Sumi-Trawl domain crawler.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use sumi_trawl::config::{load_config_with_hash, validate, Config};
use sumi_trawl::crawler::crawl;
use sumi_trawl::output::{print_error_report, print_statistics};
use sumi_trawl::render::HttpEngine;
use tracing_subscriber::EnvFilter;

/// Sumi-Trawl: a domain crawler
///
/// Sumi-Trawl visits every page of a site once, following same-site links
/// with a bounded number of pages open at a time, and blocks third-party
/// and heavyweight requests along the way.
#[derive(Parser, Debug)]
#[command(name = "sumi-trawl")]
#[command(version)]
#[command(about = "A concurrency-bounded domain crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Seed URL (repeatable); replaces the seeds from the config file
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,

    /// Maximum number of pages open at once
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Directory to save page screenshots to
    #[arg(long, value_name = "DIR")]
    screenshots: Option<PathBuf>,

    /// Outbound proxy address for every session
    #[arg(long, value_name = "URL")]
    proxy: Option<String>,

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
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    apply_overrides(&mut config, &cli);
    validate(&config).context("Invalid configuration after command-line overrides")?;

    if config.crawler.seeds.is_empty() {
        anyhow::bail!("No seed URLs: set crawler.seeds or pass --seed");
    }

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(ExitCode::SUCCESS);
    }

    handle_crawl(config).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_trawl=info,warn"),
            1 => EnvFilter::new("sumi_trawl=debug,info"),
            2 => EnvFilter::new("sumi_trawl=trace,debug"),
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

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if !cli.seeds.is_empty() {
        config.crawler.seeds = cli.seeds.clone();
    }
    if let Some(max) = cli.max_concurrency {
        config.crawler.max_concurrency = max;
    }
    if let Some(dir) = &cli.screenshots {
        config.output.screenshots = Some(dir.clone());
    }
    if let Some(proxy) = &cli.proxy {
        config.crawler.proxy = Some(proxy.clone());
    }
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Trawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Max concurrency: {}", config.crawler.max_concurrency);
    println!("  Navigation timeout: {}ms", config.crawler.timeout);
    println!("  Wait until: {:?}", config.crawler.wait_until);
    println!("  Retry ceiling: {}", config.crawler.retry_ceiling);
    println!("  Max scroll duration: {}ms", config.crawler.max_scroll_duration);
    match config.crawler.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }
    println!("  User agent: {}", config.crawler.user_agent);
    if let Some(proxy) = &config.crawler.proxy {
        println!("  Proxy: {}", proxy);
    }

    println!("\nAllowed Domains ({}):", config.policy.domains.len());
    for domain in &config.policy.domains {
        println!("  - {}", domain);
    }

    println!("\nBlock List ({}):", config.policy.block_list.len());
    for entry in &config.policy.block_list {
        println!("  - {}", entry);
    }
    println!(
        "  Default vendor list: {}",
        if config.policy.use_default_block_list {
            "on"
        } else {
            "off"
        }
    );
    println!(
        "  Blocked resource kinds: {:?}",
        config.policy.blocked_resource_kinds
    );

    println!("\nLogin Forms ({}):", config.forms.len());
    for form in &config.forms {
        println!(
            "  - {} ({} fields, submit '{}')",
            form.url_pattern,
            form.fields.len(),
            form.submit_selector
        );
    }

    if let Some(dir) = &config.output.screenshots {
        println!("\nScreenshots: {}", dir.display());
    }

    println!("\nSeeds ({}):", config.crawler.seeds.len());
    for seed in &config.crawler.seeds {
        println!("  * {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
///
/// Exits with status 1 if any page failed or timed out.
async fn handle_crawl(config: Config) -> anyhow::Result<ExitCode> {
    tracing::info!(
        "Crawling {} seed URLs within {} (max {} pages at once)",
        config.crawler.seeds.len(),
        config.policy.domains.join(", "),
        config.crawler.max_concurrency
    );

    let crawler = crawl(config, Arc::new(HttpEngine::new()))
        .await
        .context("Crawl aborted")?;

    print_statistics(&crawler.stats());
    let errors = crawler.errors();
    print_error_report(&errors);

    if crawler.has_errors() {
        tracing::warn!("Crawl finished with {} errors", errors.len());
        Ok(ExitCode::FAILURE)
    } else {
        tracing::info!("Crawl completed successfully");
        Ok(ExitCode::SUCCESS)
    }
}
