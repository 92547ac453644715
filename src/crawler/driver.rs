//! Two-phase crawl driver
//!
//! Phase 1 walks numbered listing pages and appends detail URLs to the
//! frontier. Phase 2 visits every unprocessed frontier URL and extracts one
//! record. Every step is persisted before the next one starts, so a run can
//! stop at any point and the next run picks up where it left off.

use crate::config::Config;
use crate::crawler::extractor::{ExtractError, Extractor};
use crate::crawler::pacing::Pacing;
use crate::crawler::provider::{open_with_deadline, NavigationError, OpenOptions, PageProvider, WaitPolicy};
use crate::crawler::retry::{run_attempts, AttemptReport, RetryPolicy};
use crate::crawler::shutdown::ShutdownSignal;
use crate::output::{BatchArchiver, Record, RecordSink};
use crate::state::CrawlPhase;
use crate::storage::{compute_unprocessed, ProgressCheckpoint, ProgressUpdate, StateStore};
use crate::url::listing_page_url;
use crate::HarvestError;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// How a run treats existing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Continue from whatever the checkpoint says
    #[default]
    Normal,

    /// Clear all state first
    Fresh,

    /// Skip listing pages when the frontier already holds enough unprocessed URLs
    Resume,
}

/// Why a single listing page or detail URL failed
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("Required field missing on {0}")]
    MissingFields(String),
}

impl ItemError {
    /// True when a listing page reports that results have run out
    pub fn is_end_of_results(&self) -> bool {
        matches!(self, Self::Navigation(e) if e.is_end_of_results())
    }
}

/// Everything the driver needs from the configuration
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub listing_url: String,
    pub page_param: String,
    pub start_page: u32,
    pub items_per_page: u32,
    pub page_batch_size: u32,
    pub max_items: u32,
    pub checkpoint_interval: u32,
    /// Skip URLs that already used up their attempts in earlier runs
    pub skip_exhausted: bool,
    /// Store each record in the visited ledger
    pub audit_payloads: bool,
    pub listing_options: OpenOptions,
    pub detail_options: OpenOptions,
    pub retry: RetryPolicy,
    pub pacing: Pacing,
    pub field_names: Vec<String>,
    pub config_hash: Option<String>,
}

impl DriverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            listing_url: config.listing.url.clone(),
            page_param: config.listing.page_param.clone(),
            start_page: config.listing.start_page,
            items_per_page: config.listing.items_per_page,
            page_batch_size: config.listing.page_batch_size,
            max_items: config.limits.max_items,
            checkpoint_interval: config.limits.checkpoint_interval,
            skip_exhausted: !config.limits.retry_failed_on_resume,
            audit_payloads: config.output.audit_payloads,
            listing_options: OpenOptions {
                wait: WaitPolicy {
                    ready_selector: Some(config.listing.ready_selector.clone()),
                    no_results_selector: config.listing.no_results_selector.clone(),
                },
                timeout: Duration::from_millis(config.listing.timeout_ms),
            },
            detail_options: OpenOptions {
                wait: WaitPolicy {
                    ready_selector: config.detail.ready_selector.clone(),
                    no_results_selector: None,
                },
                timeout: Duration::from_millis(config.detail.timeout_ms),
            },
            retry: RetryPolicy::from_config(&config.retry),
            pacing: Pacing::from_config(&config.pacing),
            field_names: config.detail.fields.iter().map(|f| f.name.clone()).collect(),
            config_hash: None,
        }
    }

    /// Listing pages needed to reach `max_items`
    pub fn pages_needed(&self) -> u32 {
        let per_page = self.items_per_page.max(1);
        self.max_items.div_ceil(per_page).max(1)
    }

    /// Last listing page this harvest will request
    pub fn last_page(&self) -> u32 {
        self.start_page + self.pages_needed() - 1
    }
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages_requested: u32,
    /// URLs newly added to the frontier by this run
    pub urls_collected: usize,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Frontier URLs found already visited when their turn came
    pub skipped: u64,
    pub batches_written: u64,
    /// Records with a non-empty value, per field, in column order
    pub field_fill: Vec<(String, u64)>,
    pub frontier_size: usize,
    pub total_visited: usize,
    pub total_failed: usize,
}

impl RunSummary {
    fn new(field_names: &[String]) -> Self {
        Self {
            field_fill: field_names.iter().map(|n| (n.clone(), 0)).collect(),
            ..Default::default()
        }
    }

    fn count_fields(&mut self, record: &Record) {
        for (name, count) in &mut self.field_fill {
            if record.field(name).is_some() {
                *count += 1;
            }
        }
    }

    /// Fill count for one field
    pub fn filled(&self, name: &str) -> Option<u64> {
        self.field_fill
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, count)| *count)
    }

    /// Writes the summary to the log
    pub fn log(&self) {
        tracing::info!("===== Harvest Summary =====");
        tracing::info!("Listing pages requested: {}", self.pages_requested);
        tracing::info!("New URLs collected: {}", self.urls_collected);
        tracing::info!(
            "Items: {} attempted, {} succeeded, {} failed, {} skipped",
            self.attempted,
            self.succeeded,
            self.failed,
            self.skipped
        );
        tracing::info!("Batches written: {}", self.batches_written);
        tracing::info!(
            "State: {} in frontier, {} visited, {} with failures",
            self.frontier_size,
            self.total_visited,
            self.total_failed
        );
        for (name, count) in &self.field_fill {
            tracing::info!("  {}: {}/{}", name, count, self.succeeded);
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Both phases finished
    Completed(RunSummary),

    /// Shutdown was requested; state is checkpointed for `--resume`
    Interrupted(RunSummary),
}

impl CrawlOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            Self::Completed(summary) | Self::Interrupted(summary) => summary,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

enum PhaseEnd {
    Finished,
    Interrupted,
}

/// Runs a harvest against a state store, page provider and extractor
pub struct CrawlDriver {
    settings: DriverSettings,
    store: Box<dyn StateStore>,
    provider: Box<dyn PageProvider>,
    extractor: Box<dyn Extractor>,
    sink: Box<dyn RecordSink>,
    archiver: BatchArchiver,
    shutdown: ShutdownSignal,
    checkpoint: ProgressCheckpoint,
    summary: RunSummary,
    last_url: Option<String>,
}

impl CrawlDriver {
    pub fn new(
        settings: DriverSettings,
        store: Box<dyn StateStore>,
        provider: Box<dyn PageProvider>,
        extractor: Box<dyn Extractor>,
        sink: Box<dyn RecordSink>,
        archiver: BatchArchiver,
        shutdown: ShutdownSignal,
    ) -> Self {
        let summary = RunSummary::new(&settings.field_names);
        Self {
            settings,
            store,
            provider,
            extractor,
            sink,
            archiver,
            shutdown,
            checkpoint: ProgressCheckpoint::default(),
            summary,
            last_url: None,
        }
    }

    pub fn store(&self) -> &dyn StateStore {
        &*self.store
    }

    /// The checkpoint as last loaded or saved by this driver
    pub fn checkpoint(&self) -> &ProgressCheckpoint {
        &self.checkpoint
    }

    /// Runs both phases
    ///
    /// # Arguments
    ///
    /// * `mode` - How to treat existing state
    /// * `headless` - Passed to the page provider's session
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlOutcome)` - The harvest completed or was interrupted cleanly
    /// * `Err(HarvestError)` - A store, sink or session failure; the checkpoint
    ///   is marked interrupted and pending records are flushed first
    pub async fn run(&mut self, mode: RunMode, headless: bool) -> Result<CrawlOutcome, HarvestError> {
        if mode == RunMode::Fresh {
            self.store.reset()?;
            tracing::info!("Starting fresh: frontier, ledgers and checkpoint cleared");
        }

        self.checkpoint = self.store.load_checkpoint()?;
        self.summary = RunSummary::new(&self.settings.field_names);
        self.last_url = None;
        self.warn_on_config_change();

        tracing::info!(
            backend = self.store.backend_name(),
            "Target: {} items, {} per page, {} listing page(s)",
            self.settings.max_items,
            self.settings.items_per_page,
            self.settings.pages_needed()
        );

        self.provider.start_session(headless).await?;

        let result = self.run_phases(mode).await;
        if let Err(e) = &result {
            tracing::error!("Harvest stopped by error: {}", e);
            self.drain();
        }
        self.close_session().await;

        if let Ok(outcome) = &result {
            outcome.summary().log();
        }
        result
    }

    async fn run_phases(&mut self, mode: RunMode) -> Result<CrawlOutcome, HarvestError> {
        let entry = self.entry_phase(mode)?;

        if entry == CrawlPhase::CollectingUrls {
            self.move_to(CrawlPhase::CollectingUrls, ProgressUpdate::default())?;
            if let PhaseEnd::Interrupted = self.collect_frontier().await? {
                return self.interrupt();
            }
        }

        self.move_to(CrawlPhase::ExtractingData, ProgressUpdate::default())?;
        if let PhaseEnd::Interrupted = self.extract_all().await? {
            return self.interrupt();
        }

        self.finish()
    }

    /// Decides which phase this run starts in
    fn entry_phase(&mut self, mode: RunMode) -> Result<CrawlPhase, HarvestError> {
        let saved = self.checkpoint.phase;

        let phase = match saved {
            CrawlPhase::Initializing => CrawlPhase::CollectingUrls,
            CrawlPhase::Completed => {
                tracing::info!("Previous harvest completed; starting another pass");
                self.move_to(
                    CrawlPhase::Initializing,
                    ProgressUpdate {
                        started_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )?;
                CrawlPhase::CollectingUrls
            }
            CrawlPhase::CollectingUrls | CrawlPhase::ExtractingData => {
                tracing::warn!(
                    "Previous run stopped during {} without checkpointing an interruption; re-entering it",
                    saved
                );
                saved
            }
            CrawlPhase::Interrupted => {
                let phase = self
                    .checkpoint
                    .interrupted_phase
                    .filter(CrawlPhase::is_active)
                    .unwrap_or(CrawlPhase::CollectingUrls);
                tracing::info!("Resuming interrupted harvest in {}", phase);
                phase
            }
        };

        if mode == RunMode::Resume && phase == CrawlPhase::CollectingUrls {
            let unprocessed =
                compute_unprocessed(&*self.store, None, self.exhausted_limit())?.len();
            let needed = self.settings.max_items as usize;

            if unprocessed >= needed {
                tracing::info!(
                    "Found {} unprocessed URLs in the frontier; skipping listing pages",
                    unprocessed
                );
                return Ok(CrawlPhase::ExtractingData);
            }

            tracing::info!(
                "Found {} unprocessed URLs (need {}); collecting more",
                unprocessed,
                needed
            );
        }

        Ok(phase)
    }

    // ===== Phase 1: Listing Pages =====

    async fn collect_frontier(&mut self) -> Result<PhaseEnd, HarvestError> {
        let max_items = self.settings.max_items as usize;
        let last_page = self.settings.last_page();

        self.checkpoint = self.store.save_checkpoint(&ProgressUpdate {
            total_pages: Some(self.settings.pages_needed()),
            ..Default::default()
        })?;

        let collected = self.store.frontier_len()?;
        if collected >= max_items {
            tracing::info!(
                "Frontier already holds {} URLs (need {}); skipping listing pages",
                collected,
                max_items
            );
            return Ok(PhaseEnd::Finished);
        }

        let first_page = self.settings.start_page.max(self.checkpoint.current_page + 1);
        if first_page > last_page {
            tracing::info!("All {} listing page(s) already collected", self.settings.pages_needed());
            return Ok(PhaseEnd::Finished);
        }

        tracing::info!(
            "Collecting listing pages {} to {} ({} URLs in frontier)",
            first_page,
            last_page,
            collected
        );

        let mut in_group = 0;
        for page in first_page..=last_page {
            if self.shutdown.is_triggered() {
                return Ok(PhaseEnd::Interrupted);
            }

            if in_group == self.settings.page_batch_size {
                let delay = self.settings.pacing.batch_delay();
                tracing::debug!("Pausing {}ms between listing page groups", delay.as_millis());
                if !self.shutdown.sleep(delay).await {
                    return Ok(PhaseEnd::Interrupted);
                }
                in_group = 0;
            }
            in_group += 1;

            let page_url = listing_page_url(
                &self.settings.listing_url,
                &self.settings.page_param,
                page,
            )?;
            tracing::info!("Loading listing page {}: {}", page, page_url);
            self.summary.pages_requested += 1;

            let report = self.attempt_listing(&page_url).await;
            if report.is_interrupted() {
                return Ok(PhaseEnd::Interrupted);
            }

            let urls = match report.value {
                Some(urls) => urls,
                None => {
                    match report.last_error {
                        Some(e) if e.is_end_of_results() => {
                            tracing::info!("No more results at page {}: {}", page, e);
                        }
                        Some(e) => {
                            tracing::warn!(
                                "Listing page {} failed after {} attempt(s): {}; continuing with the URLs collected so far",
                                page,
                                report.attempts,
                                e
                            );
                        }
                        None => {}
                    }
                    break;
                }
            };

            if urls.is_empty() {
                tracing::info!("No more results at page {}", page);
                break;
            }

            let found = urls.len();
            let urls: Vec<String> = urls.into_iter().map(String::from).collect();
            let added = self.store.append_frontier(&urls)?;
            let total = self.store.frontier_len()?;
            self.summary.urls_collected += added;

            self.checkpoint = self.store.save_checkpoint(&ProgressUpdate {
                current_page: Some(page),
                total_collected: Some(total as u64),
                ..Default::default()
            })?;

            tracing::info!(
                "Page {}: {} links, {} new, {} in frontier",
                page,
                found,
                added,
                total
            );

            if total >= max_items {
                tracing::info!("Collected {} URLs, enough for {} items", total, max_items);
                break;
            }
        }

        Ok(PhaseEnd::Finished)
    }

    async fn attempt_listing(&self, target: &Url) -> AttemptReport<Vec<Url>, ItemError> {
        let provider = &*self.provider;
        let extractor = &*self.extractor;
        let options = &self.settings.listing_options;

        run_attempts(
            &self.settings.retry,
            &self.shutdown,
            target.as_str(),
            |_| async move {
                let page = open_with_deadline(provider, target, options).await?;
                Ok::<_, ItemError>(extractor.list_urls(&page)?)
            },
            |e: &ItemError| !e.is_end_of_results(),
        )
        .await
    }

    // ===== Phase 2: Detail Pages =====

    async fn extract_all(&mut self) -> Result<PhaseEnd, HarvestError> {
        let urls = compute_unprocessed(
            &*self.store,
            Some(self.settings.max_items as usize),
            self.exhausted_limit(),
        )?;
        let total = urls.len();

        if total == 0 {
            tracing::info!("No unprocessed URLs left");
            return Ok(PhaseEnd::Finished);
        }

        tracing::info!(
            "Processing {} URL(s), {} already visited",
            total,
            self.store.visited_count()?
        );

        let mut since_checkpoint = 0;
        for (index, url) in urls.iter().enumerate() {
            if self.shutdown.is_triggered() {
                return Ok(PhaseEnd::Interrupted);
            }

            let progress = format!("[{}/{}]", index + 1, total);

            if self.store.is_visited(url)? {
                tracing::debug!("{} Already visited: {}", progress, url);
                self.summary.skipped += 1;
                continue;
            }

            tracing::info!("{} Visiting {}", progress, url);
            self.summary.attempted += 1;

            let succeeded = match Url::parse(url) {
                Ok(target) => {
                    let report = self.attempt_detail(&target).await;
                    if report.is_interrupted() {
                        tracing::info!("{} Stopped before retrying {}", progress, url);
                        return Ok(PhaseEnd::Interrupted);
                    }

                    match report.value {
                        Some(record) => {
                            self.record_success(url, record)?;
                            true
                        }
                        None => {
                            let error = report
                                .last_error
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "unknown error".to_string());
                            self.record_failure(&progress, url, &error, report.attempts)?;
                            false
                        }
                    }
                }
                Err(e) => {
                    let error = format!("Invalid URL in frontier: {}", e);
                    self.record_failure(&progress, url, &error, self.settings.retry.max_attempts)?;
                    false
                }
            };

            if succeeded {
                tracing::info!(
                    "{} Extracted ({} succeeded, {} failed this run)",
                    progress,
                    self.summary.succeeded,
                    self.summary.failed
                );
            }

            self.last_url = Some(url.clone());
            since_checkpoint += 1;
            if since_checkpoint >= self.settings.checkpoint_interval {
                self.save_progress()?;
                since_checkpoint = 0;
                tracing::debug!("Checkpoint saved after {}", url);
            }

            if succeeded && index + 1 < total {
                let delay = self.settings.pacing.item_delay();
                tracing::debug!("Waiting {}ms", delay.as_millis());
                self.shutdown.sleep(delay).await;
            }
        }

        self.save_progress()?;
        Ok(PhaseEnd::Finished)
    }

    async fn attempt_detail(&self, target: &Url) -> AttemptReport<Record, ItemError> {
        let provider = &*self.provider;
        let extractor = &*self.extractor;
        let options = &self.settings.detail_options;

        run_attempts(
            &self.settings.retry,
            &self.shutdown,
            target.as_str(),
            |_| async move {
                let page = open_with_deadline(provider, target, options).await?;
                match extractor.extract_detail(&page)? {
                    Some(record) => Ok::<_, ItemError>(record),
                    None => Err(ItemError::MissingFields(target.to_string())),
                }
            },
            |_: &ItemError| true,
        )
        .await
    }

    /// CSV row, then visited ledger, then archive buffer
    fn record_success(&mut self, url: &str, record: Record) -> Result<(), HarvestError> {
        self.sink.append(&record)?;

        let payload = self.settings.audit_payloads.then(|| record.to_payload());
        self.store.mark_visited(url, payload)?;

        self.summary.succeeded += 1;
        self.summary.count_fields(&record);

        if let Some(sequence) = self.archiver.push(record)? {
            self.summary.batches_written += 1;
            tracing::debug!("Archived batch {}", sequence);
        }

        Ok(())
    }

    fn record_failure(
        &mut self,
        progress: &str,
        url: &str,
        error: &str,
        attempts: u32,
    ) -> Result<(), HarvestError> {
        let failure = self.store.mark_failed(url, error, attempts)?;
        self.summary.failed += 1;

        tracing::warn!(
            "{} Failed after {} attempt(s), {} in total: {}",
            progress,
            attempts,
            failure.attempt_count,
            error
        );
        Ok(())
    }

    // ===== Checkpointing =====

    /// Moves the checkpoint to `next`, merging `update` into the same save
    fn move_to(&mut self, next: CrawlPhase, mut update: ProgressUpdate) -> Result<(), HarvestError> {
        let current = self.checkpoint.phase;
        if current != next && !current.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        update.phase = Some(next);
        if next.is_active() {
            update.interrupted_phase = Some(None);
        }
        if update.config_hash.is_none() {
            update.config_hash = self.settings.config_hash.clone();
        }

        self.checkpoint = self.store.save_checkpoint(&update)?;

        if current != next {
            tracing::info!("Phase: {} -> {}", current, next);
        }
        Ok(())
    }

    fn counts_update(&self) -> Result<ProgressUpdate, HarvestError> {
        Ok(ProgressUpdate {
            total_collected: Some(self.store.frontier_len()? as u64),
            total_processed: Some(self.store.visited_count()? as u64),
            total_failed: Some(self.store.failure_count()? as u64),
            last_processed_url: self.last_url.clone(),
            ..Default::default()
        })
    }

    fn save_progress(&mut self) -> Result<(), HarvestError> {
        let update = self.counts_update()?;
        self.checkpoint = self.store.save_checkpoint(&update)?;
        Ok(())
    }

    fn flush_archive(&mut self) -> Result<(), HarvestError> {
        if let Some(sequence) = self.archiver.flush()? {
            self.summary.batches_written += 1;
            tracing::debug!("Archived partial batch {}", sequence);
        }
        Ok(())
    }

    fn finalize_summary(&mut self) -> Result<(), HarvestError> {
        self.summary.frontier_size = self.store.frontier_len()?;
        self.summary.total_visited = self.store.visited_count()?;
        self.summary.total_failed = self.store.failure_count()?;
        Ok(())
    }

    fn interrupt(&mut self) -> Result<CrawlOutcome, HarvestError> {
        let phase = self.checkpoint.phase;
        self.flush_archive()?;

        let mut update = self.counts_update()?;
        if phase.is_active() {
            update.interrupted_phase = Some(Some(phase));
        }
        self.move_to(CrawlPhase::Interrupted, update)?;
        self.finalize_summary()?;

        tracing::warn!(
            "Harvest interrupted during {}; progress saved. Run again with --resume to continue.",
            phase
        );
        Ok(CrawlOutcome::Interrupted(self.summary.clone()))
    }

    fn finish(&mut self) -> Result<CrawlOutcome, HarvestError> {
        self.flush_archive()?;

        let update = self.counts_update()?;
        self.move_to(CrawlPhase::Completed, update)?;
        self.finalize_summary()?;

        tracing::info!("Harvest complete");
        Ok(CrawlOutcome::Completed(self.summary.clone()))
    }

    /// Best-effort flush and checkpoint after a fatal error
    fn drain(&mut self) {
        if let Err(e) = self.flush_archive() {
            tracing::error!("Failed to archive pending records: {}", e);
        }

        let phase = self.checkpoint.phase;
        if !phase.can_transition_to(CrawlPhase::Interrupted) {
            return;
        }

        let mut update = self.counts_update().unwrap_or_default();
        if phase.is_active() {
            update.interrupted_phase = Some(Some(phase));
        }
        if let Err(e) = self.move_to(CrawlPhase::Interrupted, update) {
            tracing::error!("Failed to save checkpoint: {}", e);
        }
    }

    async fn close_session(&mut self) {
        if let Err(e) = self.provider.close().await {
            tracing::warn!("Failed to close page provider session: {}", e);
        }
    }

    fn exhausted_limit(&self) -> Option<u32> {
        self.settings
            .skip_exhausted
            .then_some(self.settings.retry.max_attempts)
    }

    fn warn_on_config_change(&self) {
        if self.checkpoint.phase == CrawlPhase::Initializing {
            return;
        }

        if let (Some(saved), Some(current)) = (&self.checkpoint.config_hash, &self.settings.config_hash) {
            if saved != current {
                tracing::warn!(
                    "Configuration changed since the saved checkpoint; continuing with the new settings"
                );
            }
        }
    }
}
