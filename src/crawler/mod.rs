//! Crawler module for the two-phase harvest
//!
//! This module contains the core harvesting logic, including:
//! - The page provider seam and its HTTP implementation
//! - Link and field extraction with CSS selectors
//! - The per-item retry loop and politeness delays
//! - Cooperative shutdown on SIGINT/SIGTERM
//! - The crawl driver that ties the phases to the state stores

mod driver;
mod extractor;
mod pacing;
mod provider;
mod retry;
mod shutdown;

pub use driver::{CrawlDriver, CrawlOutcome, DriverSettings, ItemError, RunMode, RunSummary};
pub use extractor::{ExtractError, Extractor, SelectorExtractor, MULTI_VALUE_SEPARATOR};
pub use pacing::{jittered_delay, Pacing};
pub use provider::{
    build_http_client, check_wait_policy, default_user_agent, open_with_deadline, HttpPageProvider,
    NavigationError, OpenOptions, Page, PageProvider, WaitPolicy,
};
pub use retry::{run_attempts, AttemptReport, RetryPolicy};
pub use shutdown::{
    listen_for_signals, shutdown_channel, ShutdownSignal, ShutdownTrigger, FORCED_EXIT_CODE,
};

use crate::config::{Config, SessionEnv};
use crate::output::{BatchArchiver, CsvSink, Record};
use crate::storage::open_state_store;
use crate::HarvestError;
use url::Url;

/// Options for one harvest run
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    pub mode: RunMode,
    pub headless: bool,
    /// Hash of the configuration file, stored in the checkpoint
    pub config_hash: Option<String>,
    pub session_env: SessionEnv,
}

/// Assembles a driver from the configuration and a page provider
///
/// Opens the state store, the CSV sink and the batch archiver.
pub fn build_driver(
    config: &Config,
    provider: Box<dyn PageProvider>,
    config_hash: Option<String>,
    shutdown: ShutdownSignal,
) -> Result<CrawlDriver, HarvestError> {
    let extractor = SelectorExtractor::from_config(config)?;
    let store = open_state_store(config)?;
    let sink = CsvSink::open(&config.output.csv_path, extractor.field_names())?;
    let archiver = BatchArchiver::open(&config.output.batch_dir, config.output.batch_size as usize)?;

    let mut settings = DriverSettings::from_config(config);
    settings.config_hash = config_hash;

    Ok(CrawlDriver::new(
        settings,
        store,
        provider,
        Box::new(extractor),
        Box::new(sink),
        archiver,
        shutdown,
    ))
}

/// Runs a complete harvest over HTTP
///
/// This is the main entry point for starting a harvest. It will:
/// 1. Open the state store, CSV sink and batch archiver
/// 2. Start an HTTP page provider session
/// 3. Collect detail URLs from listing pages
/// 4. Extract one record per detail URL
/// 5. Checkpoint and report a summary
///
/// # Arguments
///
/// * `config` - The harvest configuration
/// * `options` - Run mode, headless flag, config hash and session environment
/// * `shutdown` - Signal observed between items and during waits
///
/// # Returns
///
/// * `Ok(CrawlOutcome)` - The harvest completed or was interrupted cleanly
/// * `Err(HarvestError)` - The harvest failed
pub async fn harvest(
    config: &Config,
    options: HarvestOptions,
    shutdown: ShutdownSignal,
) -> Result<CrawlOutcome, HarvestError> {
    let provider = HttpPageProvider::new(&config.session, &options.session_env);
    let mut driver = build_driver(config, Box::new(provider), options.config_hash, shutdown)?;
    driver.run(options.mode, options.headless).await
}

/// Extracts a single detail page without touching any state
///
/// Returns `None` when a required field is missing.
pub async fn inspect(
    config: &Config,
    url: &str,
    session_env: &SessionEnv,
    headless: bool,
) -> Result<Option<Record>, HarvestError> {
    let target = Url::parse(url)?;
    let extractor = SelectorExtractor::from_config(config)?;
    let settings = DriverSettings::from_config(config);

    let mut provider = HttpPageProvider::new(&config.session, session_env);
    provider.start_session(headless).await?;

    let result = open_with_deadline(&provider, &target, &settings.detail_options).await;

    if let Err(e) = provider.close().await {
        tracing::warn!("Failed to close page provider session: {}", e);
    }

    Ok(extractor.extract_detail(&result?)?)
}
