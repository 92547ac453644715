//! Crawl driver tests against a scripted site

use crate::common::{
    csv_lines, detail_url, listing_url, no_results_body, FakeSite, TestConfig,
};
use page_harvest::config::Config;
use page_harvest::crawler::{
    build_driver, shutdown_channel, CrawlDriver, DriverSettings, SelectorExtractor,
    ShutdownSignal,
};
use page_harvest::output::{BatchArchiver, OutputError, OutputResult, Record, RecordSink};
use page_harvest::storage::{compute_unprocessed, open_state_store, ProgressUpdate};
use page_harvest::{CrawlOutcome, CrawlPhase, HarvestError, RunMode};
use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;

fn driver(config: &Config, site: &FakeSite) -> CrawlDriver {
    build_driver(config, site.provider(), None, ShutdownSignal::never()).unwrap()
}

async fn run(config: &Config, site: &FakeSite, mode: RunMode) -> CrawlOutcome {
    driver(config, site).run(mode, true).await.unwrap()
}

#[tokio::test]
async fn test_phase_one_requests_only_the_pages_needed() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(120, 50).build(dir.path());
    let site = FakeSite::with_listing(5, 50);

    let mut driver = driver(&config, &site);
    let outcome = driver.run(RunMode::Normal, true).await.unwrap();

    let summary = match &outcome {
        CrawlOutcome::Completed(summary) => summary,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(summary.pages_requested, 3);
    assert_eq!(summary.urls_collected, 150);
    assert_eq!(summary.attempted, 120);
    assert_eq!(summary.succeeded, 120);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.filled("name"), Some(120));
    assert_eq!(summary.filled("title"), Some(120));

    assert_eq!(
        site.listing_opens(),
        vec![listing_url(1), listing_url(2), listing_url(3)]
    );
    assert_eq!(site.detail_opens().len(), 120);
    assert_eq!(site.sessions(), (1, 1));

    let store = driver.store();
    assert_eq!(store.frontier_len().unwrap(), 150);
    assert_eq!(store.visited_count().unwrap(), 120);
    assert!(!store.load_frontier().unwrap().iter().any(|u| u.contains("media-outlet")));

    let checkpoint = store.load_checkpoint().unwrap();
    assert_eq!(checkpoint.phase, CrawlPhase::Completed);
    assert_eq!(checkpoint.current_page, 3);
    assert_eq!(checkpoint.total_pages, 3);
    assert_eq!(checkpoint.total_collected, 150);
    assert_eq!(checkpoint.total_processed, 120);

    let lines = csv_lines(&config);
    assert_eq!(lines.len(), 121);
    assert_eq!(lines[0], "name,title,url");
    assert_eq!(lines[1], format!("Person 1-0,Analyst,{}", detail_url(1, 0)));

    let archiver = BatchArchiver::open(&config.output.batch_dir, 50).unwrap();
    assert_eq!(archiver.list_batches().unwrap(), vec![1, 2, 3]);
    assert_eq!(archiver.load_batch(3).unwrap().count, 20);
}

#[tokio::test]
async fn test_item_succeeds_after_transient_failures() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(10, 10).build(dir.path());
    let site = FakeSite::with_listing(1, 10);
    let flaky = detail_url(1, 3);
    site.fail_times(&flaky, 2);

    let mut driver = driver(&config, &site);
    let outcome = driver.run(RunMode::Normal, true).await.unwrap();

    assert_eq!(outcome.summary().succeeded, 10);
    assert_eq!(outcome.summary().failed, 0);
    assert_eq!(site.opens_of(&flaky), 3);

    let store = driver.store();
    assert!(store.is_visited(&flaky).unwrap());
    assert_eq!(store.failure_count().unwrap(), 0);
}

#[tokio::test]
async fn test_item_failure_recorded_after_max_attempts() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(10, 10).build(dir.path());
    let site = FakeSite::with_listing(1, 10);
    let broken = detail_url(1, 0);
    site.fail_times(&broken, 100);

    let mut driver = driver(&config, &site);
    let outcome = driver.run(RunMode::Normal, true).await.unwrap();

    assert!(!outcome.is_interrupted());
    assert_eq!(outcome.summary().failed, 1);
    assert_eq!(outcome.summary().succeeded, 9);
    assert_eq!(site.opens_of(&broken), 3);

    let store = driver.store();
    assert!(!store.is_visited(&broken).unwrap());
    let failure = store.get_failure(&broken).unwrap().unwrap();
    assert_eq!(failure.attempt_count, 3);
    assert!(failure.last_error.contains("connection reset"));
    assert_eq!(store.load_checkpoint().unwrap().total_failed, 1);
}

#[tokio::test]
async fn test_failed_urls_are_retried_on_the_next_run() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(10, 10).build(dir.path());
    let site = FakeSite::with_listing(1, 10);
    let broken = detail_url(1, 5);
    site.fail_times(&broken, 100);

    run(&config, &site, RunMode::Normal).await;
    let second = run(&config, &site, RunMode::Normal).await;

    assert_eq!(second.summary().pages_requested, 0);
    assert_eq!(second.summary().attempted, 1);
    assert_eq!(site.opens_of(&broken), 6);

    let store = open_state_store(&config).unwrap();
    assert_eq!(store.get_failure(&broken).unwrap().unwrap().attempt_count, 6);
}

#[tokio::test]
async fn test_exhausted_urls_are_skipped_when_configured() {
    let dir = TempDir::new().unwrap();
    let mut builder = TestConfig::new(10, 10);
    builder.retry_failed_on_resume = false;
    let config = builder.build(dir.path());
    let site = FakeSite::with_listing(1, 10);
    let broken = detail_url(1, 5);
    site.fail_times(&broken, 100);

    run(&config, &site, RunMode::Normal).await;
    let second = run(&config, &site, RunMode::Normal).await;

    assert_eq!(second.summary().attempted, 0);
    assert_eq!(site.opens_of(&broken), 3);
}

#[tokio::test]
async fn test_fresh_run_clears_all_state() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(10, 10).build(dir.path());
    let site = FakeSite::with_listing(1, 10);
    let broken = detail_url(1, 9);
    site.fail_times(&broken, 100);

    run(&config, &site, RunMode::Normal).await;

    let again = run(&config, &site, RunMode::Normal).await;
    assert_eq!(again.summary().urls_collected, 0);
    assert_eq!(site.listing_opens().len(), 1);

    let fresh = run(&config, &site, RunMode::Fresh).await;
    assert_eq!(fresh.summary().urls_collected, 10);
    assert_eq!(fresh.summary().attempted, 10);
    assert_eq!(site.listing_opens().len(), 2);

    let store = open_state_store(&config).unwrap();
    assert_eq!(store.visited_count().unwrap(), 9);
    // Only this run's attempts remain after the reset
    assert_eq!(store.get_failure(&broken).unwrap().unwrap().attempt_count, 3);

    // The CSV is append-only and survives a fresh start
    assert_eq!(csv_lines(&config).len(), 1 + 9 + 9);
}

#[tokio::test]
async fn test_interrupt_then_resume_never_repeats_work() {
    let dir = TempDir::new().unwrap();
    let mut builder = TestConfig::new(10, 10);
    builder.checkpoint_interval = 3;
    let config = builder.build(dir.path());
    let site = FakeSite::with_listing(1, 10);

    let (trigger, signal) = shutdown_channel();
    site.shutdown_after_details(4, trigger);

    let mut first = build_driver(&config, site.provider(), None, signal).unwrap();
    let outcome = first.run(RunMode::Normal, true).await.unwrap();

    assert!(outcome.is_interrupted());
    assert_eq!(outcome.summary().succeeded, 4);
    assert_eq!(site.sessions(), (1, 1));

    let checkpoint = first.store().load_checkpoint().unwrap();
    assert_eq!(checkpoint.phase, CrawlPhase::Interrupted);
    assert_eq!(checkpoint.interrupted_phase, Some(CrawlPhase::ExtractingData));
    assert_eq!(checkpoint.total_processed, 4);
    assert_eq!(checkpoint.last_processed_url, Some(detail_url(1, 3)));
    drop(first);

    let resumed = run(&config, &site, RunMode::Resume).await;
    assert!(!resumed.is_interrupted());
    assert_eq!(resumed.summary().attempted, 6);
    assert_eq!(resumed.summary().pages_requested, 0);

    let opened = site.detail_opens();
    let unique: HashSet<&String> = opened.iter().collect();
    assert_eq!(opened.len(), 10);
    assert_eq!(unique.len(), 10);

    let store = open_state_store(&config).unwrap();
    assert_eq!(store.visited_count().unwrap(), 10);
    assert_eq!(store.load_checkpoint().unwrap().phase, CrawlPhase::Completed);

    // The partial batch from the interrupted run keeps its number
    let archiver = BatchArchiver::open(&config.output.batch_dir, 50).unwrap();
    assert_eq!(archiver.list_batches().unwrap(), vec![1, 2]);
    assert_eq!(archiver.load_batch(1).unwrap().count, 4);
    assert_eq!(archiver.load_batch(2).unwrap().count, 6);
}

#[tokio::test]
async fn test_crash_mid_extraction_resumes_without_overlap() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(10, 10).build(dir.path());
    let site = FakeSite::with_listing(1, 10);
    let frontier: Vec<String> = (0..10).map(|i| detail_url(1, i)).collect();

    {
        let mut store = open_state_store(&config).unwrap();
        store.append_frontier(&frontier).unwrap();
        for url in &frontier[..4] {
            store.mark_visited(url, None).unwrap();
        }
        store
            .save_checkpoint(&ProgressUpdate {
                current_page: Some(1),
                ..ProgressUpdate::phase(CrawlPhase::ExtractingData)
            })
            .unwrap();
    }

    let store = open_state_store(&config).unwrap();
    let unprocessed = compute_unprocessed(store.as_ref(), None, None).unwrap();
    let visited = store.load_visited().unwrap();
    assert_eq!(unprocessed, frontier[4..].to_vec());
    assert!(unprocessed.iter().all(|u| !visited.contains(u)));
    drop(store);

    let outcome = run(&config, &site, RunMode::Normal).await;

    assert!(site.listing_opens().is_empty());
    assert_eq!(site.detail_opens(), frontier[4..].to_vec());
    assert_eq!(outcome.summary().succeeded, 6);
    assert_eq!(outcome.summary().total_visited, 10);
}

#[tokio::test]
async fn test_resume_skips_listing_when_frontier_is_full() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(10, 10).build(dir.path());
    let site = FakeSite::with_listing(1, 10);

    {
        let mut store = open_state_store(&config).unwrap();
        let frontier: Vec<String> = (0..10).map(|i| detail_url(1, i)).collect();
        store.append_frontier(&frontier).unwrap();
    }

    let outcome = run(&config, &site, RunMode::Resume).await;

    assert!(site.listing_opens().is_empty());
    assert_eq!(outcome.summary().succeeded, 10);
}

#[tokio::test]
async fn test_no_results_page_ends_collection() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(200, 50).build(dir.path());
    let site = FakeSite::with_listing(2, 50);
    site.add_page(&listing_url(3), &no_results_body());

    let mut driver = driver(&config, &site);
    let outcome = driver.run(RunMode::Normal, true).await.unwrap();

    // The sentinel page is requested once and never retried
    assert_eq!(site.listing_opens().len(), 3);
    assert_eq!(site.opens_of(&listing_url(3)), 1);
    assert_eq!(outcome.summary().pages_requested, 3);
    assert_eq!(driver.store().frontier_len().unwrap(), 100);
    assert_eq!(outcome.summary().succeeded, 100);
    assert_eq!(driver.store().load_checkpoint().unwrap().current_page, 2);
}

#[tokio::test]
async fn test_sqlite_backend_harvest() {
    let dir = TempDir::new().unwrap();
    let mut builder = TestConfig::new(10, 10);
    builder.backend = "sqlite";
    let config = builder.build(dir.path());
    let site = FakeSite::with_listing(1, 10);

    let outcome = run(&config, &site, RunMode::Normal).await;

    assert_eq!(outcome.summary().succeeded, 10);
    assert!(config.output.state_dir.join("state.db").exists());
    assert!(!config.output.state_dir.join("frontier.json").exists());

    let store = open_state_store(&config).unwrap();
    assert_eq!(store.backend_name(), "sqlite");
    assert_eq!(store.visited_count().unwrap(), 10);
    assert_eq!(store.load_checkpoint().unwrap().phase, CrawlPhase::Completed);
}

#[tokio::test]
async fn test_slow_detail_page_times_out_and_is_recorded() {
    let dir = TempDir::new().unwrap();
    let mut builder = TestConfig::new(3, 3);
    builder.detail_timeout_ms = 150;
    let config = builder.build(dir.path());
    let site = FakeSite::with_listing(1, 3);
    let slow = detail_url(1, 1);
    site.slow_down(&slow, Duration::from_secs(5));

    let mut driver = driver(&config, &site);
    let outcome = driver.run(RunMode::Normal, true).await.unwrap();

    assert!(!outcome.is_interrupted());
    assert_eq!(outcome.summary().succeeded, 2);
    assert_eq!(outcome.summary().failed, 1);
    assert_eq!(site.opens_of(&slow), 3);

    let store = driver.store();
    assert!(!store.is_visited(&slow).unwrap());
    let failure = store.get_failure(&slow).unwrap().unwrap();
    assert_eq!(failure.attempt_count, 3);
    assert_eq!(failure.last_error, "Timed out after 150ms");
}

#[tokio::test]
async fn test_slow_listing_page_ends_collection() {
    let dir = TempDir::new().unwrap();
    let mut builder = TestConfig::new(100, 50);
    builder.listing_timeout_ms = 150;
    let config = builder.build(dir.path());
    let site = FakeSite::with_listing(2, 50);
    site.slow_down(&listing_url(2), Duration::from_secs(5));

    let mut driver = driver(&config, &site);
    let outcome = driver.run(RunMode::Normal, true).await.unwrap();

    // A listing timeout is the end of results, so it is not retried
    assert_eq!(outcome.summary().pages_requested, 2);
    assert_eq!(site.opens_of(&listing_url(2)), 1);
    assert_eq!(outcome.summary().succeeded, 50);

    let store = driver.store();
    assert_eq!(store.frontier_len().unwrap(), 50);
    let checkpoint = store.load_checkpoint().unwrap();
    assert_eq!(checkpoint.current_page, 1);
    assert_eq!(checkpoint.phase, CrawlPhase::Completed);
}

#[tokio::test]
async fn test_interrupt_during_listing_resumes_at_next_page() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(150, 50).build(dir.path());
    let site = FakeSite::with_listing(3, 50);

    let (trigger, signal) = shutdown_channel();
    site.shutdown_on_open(&listing_url(2), trigger);

    let mut first = build_driver(&config, site.provider(), None, signal).unwrap();
    let outcome = first.run(RunMode::Normal, true).await.unwrap();

    assert!(outcome.is_interrupted());
    assert_eq!(outcome.summary().pages_requested, 2);
    assert_eq!(outcome.summary().attempted, 0);
    assert!(site.detail_opens().is_empty());
    assert_eq!(site.sessions(), (1, 1));

    let checkpoint = first.store().load_checkpoint().unwrap();
    assert_eq!(checkpoint.phase, CrawlPhase::Interrupted);
    assert_eq!(checkpoint.interrupted_phase, Some(CrawlPhase::CollectingUrls));
    assert_eq!(checkpoint.current_page, 2);
    assert_eq!(first.store().frontier_len().unwrap(), 100);
    drop(first);

    let resumed = run(&config, &site, RunMode::Resume).await;

    assert!(!resumed.is_interrupted());
    assert_eq!(resumed.summary().pages_requested, 1);
    assert_eq!(resumed.summary().succeeded, 150);
    assert_eq!(
        site.listing_opens(),
        vec![listing_url(1), listing_url(2), listing_url(3)]
    );

    let store = open_state_store(&config).unwrap();
    let checkpoint = store.load_checkpoint().unwrap();
    assert_eq!(checkpoint.phase, CrawlPhase::Completed);
    assert_eq!(checkpoint.interrupted_phase, None);
    assert_eq!(checkpoint.current_page, 3);
}

#[tokio::test]
async fn test_rerun_after_completion_with_full_frontier_requests_no_pages() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(10, 10).build(dir.path());
    let site = FakeSite::with_listing(2, 10);

    run(&config, &site, RunMode::Normal).await;
    let again = run(&config, &site, RunMode::Normal).await;

    assert!(!again.is_interrupted());
    assert_eq!(again.summary().pages_requested, 0);
    assert_eq!(again.summary().attempted, 0);
    assert_eq!(site.listing_opens(), vec![listing_url(1)]);

    let store = open_state_store(&config).unwrap();
    let checkpoint = store.load_checkpoint().unwrap();
    assert_eq!(checkpoint.phase, CrawlPhase::Completed);
    assert_eq!(checkpoint.current_page, 1);
}

/// Accepts `limit` rows, then fails every append like a full disk
struct FailingSink {
    limit: u64,
    rows: u64,
}

impl RecordSink for FailingSink {
    fn append(&mut self, _record: &Record) -> OutputResult<()> {
        if self.rows >= self.limit {
            return Err(OutputError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left on device",
            )));
        }
        self.rows += 1;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows
    }
}

#[tokio::test]
async fn test_sink_failure_drains_before_returning_error() {
    let dir = TempDir::new().unwrap();
    let config = TestConfig::new(10, 10).build(dir.path());
    let site = FakeSite::with_listing(1, 10);

    let mut driver = CrawlDriver::new(
        DriverSettings::from_config(&config),
        open_state_store(&config).unwrap(),
        site.provider(),
        Box::new(SelectorExtractor::from_config(&config).unwrap()),
        Box::new(FailingSink { limit: 3, rows: 0 }),
        BatchArchiver::open(&config.output.batch_dir, 50).unwrap(),
        ShutdownSignal::never(),
    );

    let result = driver.run(RunMode::Normal, true).await;

    assert!(matches!(result, Err(HarvestError::Output(_))));
    assert_eq!(site.sessions(), (1, 1));
    assert_eq!(site.detail_opens().len(), 4);

    let store = driver.store();
    assert_eq!(store.visited_count().unwrap(), 3);
    assert!(!store.is_visited(&detail_url(1, 3)).unwrap());

    let checkpoint = store.load_checkpoint().unwrap();
    assert_eq!(checkpoint.phase, CrawlPhase::Interrupted);
    assert_eq!(checkpoint.interrupted_phase, Some(CrawlPhase::ExtractingData));
    assert_eq!(checkpoint.total_processed, 3);

    // The records buffered before the failure reach the archive
    let archiver = BatchArchiver::open(&config.output.batch_dir, 50).unwrap();
    assert_eq!(archiver.list_batches().unwrap(), vec![1]);
    assert_eq!(archiver.load_batch(1).unwrap().count, 3);
}
