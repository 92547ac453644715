//! Statistics generation from the harvest state
//!
//! This module provides functionality for extracting and displaying
//! state-directory statistics for the `--stats` command.

use crate::config::Config;
use crate::output::count_batches;
use crate::storage::{compute_unprocessed, open_existing_state_store, ProgressCheckpoint, StateStore};
use crate::HarvestError;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct StateStatistics {
    /// Storage backend in use
    pub backend: &'static str,

    /// URLs in the frontier
    pub total_queued: usize,

    /// URLs processed successfully
    pub total_visited: usize,

    /// Distinct URLs in the failure ledger
    pub total_failed: usize,

    /// Failed, never-visited URLs whose attempt count reached the retry limit
    pub exhausted: usize,

    /// Frontier URLs the next run would still try to extract
    pub total_remaining: usize,

    /// Batches archived so far
    pub batches: usize,

    /// The progress checkpoint
    pub progress: ProgressCheckpoint,
}

/// Loads statistics from the state store
///
/// # Arguments
///
/// * `store` - The state store to query
/// * `batches` - Number of batch files on disk
/// * `max_retries` - Retry limit used to count exhausted failures
/// * `skip_exhausted` - Whether exhausted URLs are left out of later runs
///
/// # Returns
///
/// * `Ok(StateStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to read state
pub fn load_statistics(
    store: &dyn StateStore,
    batches: usize,
    max_retries: u32,
    skip_exhausted: bool,
) -> Result<StateStatistics, HarvestError> {
    let visited = store.load_visited()?;
    let failures = store.load_failures()?;
    let exhausted = failures
        .iter()
        .filter(|f| f.attempt_count >= max_retries && !visited.contains(&f.url))
        .count();

    let exclude = if skip_exhausted { Some(max_retries) } else { None };

    Ok(StateStatistics {
        backend: store.backend_name(),
        total_queued: store.frontier_len()?,
        total_visited: visited.len(),
        total_failed: failures.len(),
        exhausted,
        total_remaining: compute_unprocessed(store, None, exclude)?.len(),
        batches,
        progress: store.load_checkpoint()?,
    })
}

/// Loads statistics for the configured state directory without modifying it
///
/// Returns `Ok(None)` if no harvest has run there yet.
pub fn load_state_statistics(config: &Config) -> Result<Option<StateStatistics>, HarvestError> {
    let Some(store) = open_existing_state_store(config)? else {
        return Ok(None);
    };
    let batches = count_batches(&config.output.batch_dir)?;

    load_statistics(
        store.as_ref(),
        batches,
        config.retry.max_retries,
        !config.limits.retry_failed_on_resume,
    )
    .map(Some)
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &StateStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("State ({} backend):", stats.backend);
    println!("  Frontier URLs: {}", stats.total_queued);
    println!("  Visited: {}", stats.total_visited);
    println!(
        "  Failed: {} ({} exhausted retries)",
        stats.total_failed, stats.exhausted
    );
    println!("  Remaining: {}", stats.total_remaining);
    println!("  Batches archived: {}", stats.batches);
    println!();

    let progress = &stats.progress;
    println!("Progress:");
    println!("  Phase: {}", progress.phase);
    if let Some(phase) = progress.interrupted_phase {
        println!("  Interrupted during: {}", phase);
    }
    println!(
        "  Listing pages: {} / {}",
        progress.current_page, progress.total_pages
    );
    println!("  Collected: {}", progress.total_collected);
    println!("  Processed: {}", progress.total_processed);
    println!("  Failed: {}", progress.total_failed);
    if let Some(url) = &progress.last_processed_url {
        println!("  Last processed: {}", url);
    }
    println!("  Started: {}", progress.started_at.to_rfc3339());
    println!("  Updated: {}", progress.updated_at.to_rfc3339());
    println!();

    let completion = if stats.total_queued > 0 {
        (stats.total_visited as f64 / stats.total_queued as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Completion: {:.1}% ({} / {} frontier URLs visited)",
        completion, stats.total_visited, stats.total_queued
    );
}
