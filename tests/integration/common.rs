//! Shared fixtures: a scripted in-memory site and a config builder

use async_trait::async_trait;
use page_harvest::config::{parse_config, Config};
use page_harvest::crawler::{
    check_wait_policy, NavigationError, OpenOptions, Page, PageProvider, ShutdownTrigger,
};
use page_harvest::url::listing_page_url;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const LISTING_URL: &str = "https://listing.test/search?q=experts";

/// Builds a validated config rooted in a temporary directory
pub struct TestConfig {
    pub listing_url: String,
    pub max_items: u32,
    pub items_per_page: u32,
    pub max_retries: u32,
    pub retry_failed_on_resume: bool,
    pub checkpoint_interval: u32,
    pub batch_size: u32,
    pub backend: &'static str,
    pub listing_timeout_ms: u64,
    pub detail_timeout_ms: u64,
}

impl TestConfig {
    pub fn new(max_items: u32, items_per_page: u32) -> Self {
        Self {
            listing_url: LISTING_URL.to_string(),
            max_items,
            items_per_page,
            max_retries: 3,
            retry_failed_on_resume: true,
            checkpoint_interval: 10,
            batch_size: 50,
            backend: "json",
            listing_timeout_ms: 2000,
            detail_timeout_ms: 2000,
        }
    }

    pub fn build(&self, dir: &Path) -> Config {
        let dir = dir.display();
        let toml = format!(
            r#"
[listing]
url = '{listing_url}'
items-per-page = {items_per_page}
ready-selector = 'h5'
no-results-selector = '.no-results'
link-selector = 'h5 a'
exclude-patterns = ['/media-outlet/']
timeout-ms = {listing_timeout_ms}

[detail]
ready-selector = 'h1'
timeout-ms = {detail_timeout_ms}

[[detail.fields]]
name = 'name'
selector = 'h1'
required = true

[[detail.fields]]
name = 'title'
selector = 'p.title'

[limits]
max-items = {max_items}
checkpoint-interval = {checkpoint_interval}
retry-failed-on-resume = {retry_failed_on_resume}

[pacing]
item-delay-ms = 0
batch-delay-min-ms = 0
batch-delay-max-ms = 0

[retry]
max-retries = {max_retries}
backoff-base-ms = 1
backoff-max-ms = 5

[output]
state-dir = '{dir}/state'
batch-dir = '{dir}/batches'
csv-path = '{dir}/records.csv'
batch-size = {batch_size}

[storage]
backend = '{backend}'
"#,
            listing_url = self.listing_url,
            items_per_page = self.items_per_page,
            max_items = self.max_items,
            checkpoint_interval = self.checkpoint_interval,
            retry_failed_on_resume = self.retry_failed_on_resume,
            max_retries = self.max_retries,
            dir = dir,
            batch_size = self.batch_size,
            backend = self.backend,
            listing_timeout_ms = self.listing_timeout_ms,
            detail_timeout_ms = self.detail_timeout_ms,
        );

        parse_config(&toml).expect("test config should be valid")
    }
}

pub fn listing_url(page: u32) -> String {
    listing_page_url(LISTING_URL, "page", page)
        .expect("listing url")
        .to_string()
}

pub fn detail_url(page: u32, index: u32) -> String {
    format!("https://listing.test/people/p{}-{}", page, index)
}

pub fn listing_body(page: u32, per_page: u32) -> String {
    let mut body = String::from("<div role=\"tabpanel\">");
    for i in 0..per_page {
        body.push_str(&format!(
            "<h5><a href=\"/people/p{page}-{i}\">Person {page}-{i}</a></h5>"
        ));
    }
    body.push_str("<h5><a href=\"/media-outlet/daily\">Daily</a></h5></div>");
    body
}

pub fn detail_body(name: &str) -> String {
    format!("<h1>{}</h1><p class=\"title\">Analyst</p>", name)
}

pub fn no_results_body() -> String {
    "<div class=\"no-results\">No results</div>".to_string()
}

#[derive(Default)]
struct SiteState {
    pages: HashMap<String, String>,
    failures: HashMap<String, u32>,
    delays: HashMap<String, Duration>,
    shutdown_on: Option<(String, ShutdownTrigger)>,
    opens: Vec<String>,
    detail_opens: usize,
    shutdown_after: Option<(usize, ShutdownTrigger)>,
    sessions_started: usize,
    sessions_closed: usize,
}

/// A scripted site shared between a test and the provider it hands out
#[derive(Clone, Default)]
pub struct FakeSite {
    state: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `pages` full listing pages and a detail page for every link
    pub fn with_listing(pages: u32, per_page: u32) -> Self {
        let site = Self::new();
        for page in 1..=pages {
            site.add_page(&listing_url(page), &listing_body(page, per_page));
            for i in 0..per_page {
                site.add_page(&detail_url(page, i), &detail_body(&format!("Person {}-{}", page, i)));
            }
        }
        site
    }

    pub fn add_page(&self, url: &str, body: &str) {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(url.to_string(), body.to_string());
    }

    /// Makes the next `times` opens of `url` fail with a network error
    pub fn fail_times(&self, url: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(url.to_string(), times);
    }

    /// Makes every open of `url` take `delay` before answering
    pub fn slow_down(&self, url: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(url.to_string(), delay);
    }

    /// Triggers shutdown while `url` is being opened
    pub fn shutdown_on_open(&self, url: &str, trigger: ShutdownTrigger) {
        self.state.lock().unwrap().shutdown_on = Some((url.to_string(), trigger));
    }

    /// Triggers shutdown while the `n`-th detail page is being opened
    pub fn shutdown_after_details(&self, n: usize, trigger: ShutdownTrigger) {
        self.state.lock().unwrap().shutdown_after = Some((n, trigger));
    }

    pub fn opens(&self) -> Vec<String> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn listing_opens(&self) -> Vec<String> {
        self.opens()
            .into_iter()
            .filter(|u| u.contains("/search"))
            .collect()
    }

    pub fn detail_opens(&self) -> Vec<String> {
        self.opens()
            .into_iter()
            .filter(|u| u.contains("/people/"))
            .collect()
    }

    pub fn opens_of(&self, url: &str) -> usize {
        self.opens().iter().filter(|u| *u == url).count()
    }

    pub fn sessions(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.sessions_started, state.sessions_closed)
    }

    pub fn provider(&self) -> Box<dyn PageProvider> {
        Box::new(FakeProvider { site: self.clone() })
    }
}

struct FakeProvider {
    site: FakeSite,
}

#[async_trait]
impl PageProvider for FakeProvider {
    async fn start_session(&mut self, _headless: bool) -> Result<(), NavigationError> {
        self.site.state.lock().unwrap().sessions_started += 1;
        Ok(())
    }

    async fn open(&self, url: &Url, options: &OpenOptions) -> Result<Page, NavigationError> {
        let delay = self.site.state.lock().unwrap().delays.get(url.as_str()).copied();
        let body = {
            let mut state = self.site.state.lock().unwrap();
            state.opens.push(url.to_string());

            if let Some((target, trigger)) = &state.shutdown_on {
                if target == url.as_str() {
                    trigger.trigger();
                }
            }

            if url.path().starts_with("/people/") {
                state.detail_opens += 1;
                if let Some((n, trigger)) = &state.shutdown_after {
                    if state.detail_opens >= *n {
                        trigger.trigger();
                    }
                }
            }

            if let Some(remaining) = state.failures.get_mut(url.as_str()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(NavigationError::Network("connection reset".to_string()));
                }
            }

            state
                .pages
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| NavigationError::Http {
                    status: 404,
                    url: url.to_string(),
                })?
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        check_wait_policy(&body, url, &options.wait)?;

        Ok(Page {
            url: url.clone(),
            final_url: url.clone(),
            status_code: 200,
            body,
        })
    }

    async fn close(&mut self) -> Result<(), NavigationError> {
        self.site.state.lock().unwrap().sessions_closed += 1;
        Ok(())
    }
}

pub fn csv_lines(config: &Config) -> Vec<String> {
    std::fs::read_to_string(&config.output.csv_path)
        .expect("csv exists")
        .lines()
        .map(String::from)
        .collect()
}
