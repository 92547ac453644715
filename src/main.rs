//! Page-Harvest main entry point
//!
//! This is the command-line interface for the Page-Harvest listing/detail harvester.

use anyhow::Context;
use clap::Parser;
use page_harvest::config::{load_config_with_hash, load_session_env, resolve_headless, Config};
use page_harvest::crawler::{
    harvest, inspect, listen_for_signals, shutdown_channel, CrawlOutcome, DriverSettings,
    HarvestOptions,
};
use page_harvest::output::{load_state_statistics, print_statistics};
use page_harvest::RunMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Page-Harvest: a resumable listing/detail harvester
///
/// Page-Harvest walks a paginated listing to collect detail URLs, then visits
/// each one and extracts a record. Progress is checkpointed continuously, so
/// an interrupted harvest continues where it stopped.
#[derive(Parser, Debug)]
#[command(name = "page-harvest")]
#[command(version)]
#[command(about = "A resumable listing/detail harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Skip listing pages if enough unprocessed URLs are already collected
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Clear the frontier, ledgers and checkpoint before starting
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Run the page provider without a visible browser
    #[arg(long, conflicts_with = "headed")]
    headless: bool,

    /// Run the page provider with a visible browser
    #[arg(long, conflicts_with = "headless")]
    headed: bool,

    /// Validate config and show the harvest plan without fetching anything
    #[arg(long, conflicts_with_all = ["stats", "inspect"])]
    dry_run: bool,

    /// Show statistics from the state directory and exit
    #[arg(long, conflicts_with_all = ["dry_run", "inspect"])]
    stats: bool,

    /// Extract a single detail URL and print the record as JSON
    #[arg(long, value_name = "URL", conflicts_with_all = ["dry_run", "stats"])]
    inspect: Option<String>,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.fresh {
            RunMode::Fresh
        } else if self.resume {
            RunMode::Resume
        } else {
            RunMode::Normal
        }
    }

    fn headless_flag(&self) -> Option<bool> {
        match (self.headless, self.headed) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;
    tracing::debug!("Configuration hash: {}", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    if cli.stats {
        return handle_stats(&config);
    }

    let session_env = load_session_env(&config.session).context("Session environment is incomplete")?;
    let headless = resolve_headless(cli.headless_flag(), &session_env);

    if let Some(url) = &cli.inspect {
        return handle_inspect(&config, url, &session_env, headless).await;
    }

    let options = HarvestOptions {
        mode: cli.mode(),
        headless,
        config_hash: Some(config_hash),
        session_env,
    };
    handle_harvest(&config, options).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("page_harvest=info,warn"),
            1 => EnvFilter::new("page_harvest=debug,info"),
            _ => EnvFilter::new("page_harvest=trace,debug"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the plan
fn handle_dry_run(config: &Config) {
    let settings = DriverSettings::from_config(config);

    println!("=== Page-Harvest Dry Run ===\n");

    println!("Listing:");
    println!("  URL: {}", config.listing.url);
    println!(
        "  Pages: {} to {} ({} items at {} per page)",
        settings.start_page,
        settings.last_page(),
        settings.max_items,
        settings.items_per_page
    );
    println!("  Link selector: {}", config.listing.link_selector);
    if !config.listing.exclude_patterns.is_empty() {
        println!("  Excluding: {}", config.listing.exclude_patterns.join(", "));
    }

    println!("\nDetail fields ({}):", config.detail.fields.len());
    for field in &config.detail.fields {
        let mut flags = Vec::new();
        if field.required {
            flags.push("required");
        }
        if field.multiple {
            flags.push("multiple");
        }
        let source = field
            .attribute
            .as_deref()
            .map(|a| format!(" @{}", a))
            .unwrap_or_default();
        println!(
            "  - {}: {}{} {}",
            field.name,
            field.selector,
            source,
            if flags.is_empty() {
                String::new()
            } else {
                format!("[{}]", flags.join(", "))
            }
        );
    }

    println!("\nRetry: {} attempts per item", config.retry.max_retries);
    println!(
        "Pacing: item delay {}ms (x1.5-2.5), page group delay {}-{}ms",
        config.pacing.item_delay_ms, config.pacing.batch_delay_min_ms, config.pacing.batch_delay_max_ms
    );

    println!("\nOutput:");
    println!(
        "  State: {} ({:?} backend)",
        config.output.state_dir.display(),
        config.storage.backend
    );
    println!("  Batches: {} ({} per batch)", config.output.batch_dir.display(), config.output.batch_size);
    println!("  CSV: {}", config.output.csv_path.display());

    println!("\nConfiguration is valid");
}

/// Handles the --stats mode: shows statistics from the state directory
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    match load_state_statistics(config).context("Failed to read harvest state")? {
        Some(stats) => print_statistics(&stats),
        None => println!(
            "No harvest state found in {}",
            config.output.state_dir.display()
        ),
    }

    Ok(())
}

/// Handles the --inspect mode: extracts one detail page and prints it
async fn handle_inspect(
    config: &Config,
    url: &str,
    session_env: &page_harvest::config::SessionEnv,
    headless: bool,
) -> anyhow::Result<()> {
    match inspect(config, url, session_env, headless).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => anyhow::bail!("A required field is missing on {}", url),
    }
    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: &Config, options: HarvestOptions) -> anyhow::Result<()> {
    match options.mode {
        RunMode::Fresh => tracing::info!("Starting fresh harvest (ignoring previous state)"),
        RunMode::Resume => tracing::info!("Resuming harvest"),
        RunMode::Normal => tracing::info!("Starting harvest (continues from any saved progress)"),
    }

    let (trigger, shutdown) = shutdown_channel();
    let listener = listen_for_signals(trigger);

    let outcome = harvest(config, options, shutdown).await;
    listener.abort();

    match outcome.context("Harvest failed")? {
        CrawlOutcome::Completed(_) => {
            tracing::info!("Harvest completed successfully");
        }
        CrawlOutcome::Interrupted(_) => {
            tracing::warn!("Harvest interrupted. Run with --resume to continue from the saved point.");
        }
    }

    Ok(())
}
