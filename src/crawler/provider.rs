//! Page provider seam and the HTTP implementation
//!
//! The crawl driver never talks to the network directly. It asks a
//! [`PageProvider`] for a rendered page and tells it which selectors mean
//! "content loaded" and "no results". The bundled [`HttpPageProvider`]:
//! - fetches pages with `reqwest`, with gzip/brotli and a bounded redirect chain
//! - sends an optional bearer token read from the environment
//! - evaluates the wait policy against the fetched HTML

use crate::config::{SessionConfig, SessionEnv};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A page returned by a provider
#[derive(Debug, Clone)]
pub struct Page {
    /// The URL that was requested
    pub url: Url,

    /// Final URL after redirects
    pub final_url: Url,

    /// HTTP status code
    pub status_code: u16,

    /// Page body content
    pub body: String,
}

/// Selectors that tell a loaded page apart from an empty result set
#[derive(Debug, Clone, Default)]
pub struct WaitPolicy {
    pub ready_selector: Option<String>,
    pub no_results_selector: Option<String>,
}

/// Per-request options
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub wait: WaitPolicy,
    /// Deadline for the whole navigation, including the wait
    pub timeout: Duration,
}

/// Errors reported by a page provider
#[derive(Debug, Clone, Error)]
pub enum NavigationError {
    #[error("No results on {0}")]
    NoResults(String),

    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Expected content never appeared on {url} ({selector})")]
    ContentMissing { url: String, selector: String },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Session error: {0}")]
    Session(String),
}

impl NavigationError {
    /// Returns true for errors that mean a listing has run out of pages
    pub fn is_end_of_results(&self) -> bool {
        matches!(
            self,
            Self::NoResults(_) | Self::Timeout(_) | Self::ContentMissing { .. }
        )
    }
}

/// Source of rendered pages
///
/// One session is used serially by the driver.
#[async_trait]
pub trait PageProvider: Send + Sync {
    /// Prepares the provider (log in, launch a browser, build a client)
    async fn start_session(&mut self, headless: bool) -> Result<(), NavigationError>;

    /// Opens `url` and waits according to `options.wait`
    async fn open(&self, url: &Url, options: &OpenOptions) -> Result<Page, NavigationError>;

    /// Releases the session
    async fn close(&mut self) -> Result<(), NavigationError>;
}

/// Opens a page, failing with [`NavigationError::Timeout`] past `options.timeout`
pub async fn open_with_deadline(
    provider: &dyn PageProvider,
    url: &Url,
    options: &OpenOptions,
) -> Result<Page, NavigationError> {
    match tokio::time::timeout(options.timeout, provider.open(url, options)).await {
        Ok(result) => result,
        Err(_) => Err(NavigationError::Timeout(options.timeout)),
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent string to send
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Default user agent: `page-harvest/<version>`
pub fn default_user_agent() -> String {
    format!("page-harvest/{}", env!("CARGO_PKG_VERSION"))
}

/// Page provider backed by plain HTTP requests
pub struct HttpPageProvider {
    user_agent: String,
    auth_token: Option<String>,
    client: Option<Client>,
}

impl HttpPageProvider {
    /// Creates a provider; the client is built in `start_session`
    pub fn new(session: &SessionConfig, env: &SessionEnv) -> Self {
        Self {
            user_agent: session.user_agent.clone().unwrap_or_else(default_user_agent),
            auth_token: env.auth_token.clone(),
            client: None,
        }
    }
}

#[async_trait]
impl PageProvider for HttpPageProvider {
    async fn start_session(&mut self, headless: bool) -> Result<(), NavigationError> {
        if !headless {
            tracing::debug!("HTTP provider renders nothing; headed mode has no effect");
        }

        let client = build_http_client(&self.user_agent)
            .map_err(|e| NavigationError::Session(format!("Failed to build HTTP client: {}", e)))?;
        self.client = Some(client);

        tracing::debug!(user_agent = %self.user_agent, "HTTP session started");
        Ok(())
    }

    async fn open(&self, url: &Url, options: &OpenOptions) -> Result<Page, NavigationError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| NavigationError::Session("Session not started".to_string()))?;

        let mut request = client.get(url.as_str());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        let final_url = response.url().clone();

        if !status.is_success() {
            return Err(NavigationError::Http {
                status: status.as_u16(),
                url: final_url.to_string(),
            });
        }

        let body = response.text().await.map_err(classify_reqwest_error)?;

        check_wait_policy(&body, &final_url, &options.wait)?;

        Ok(Page {
            url: url.clone(),
            final_url,
            status_code: status.as_u16(),
            body,
        })
    }

    async fn close(&mut self) -> Result<(), NavigationError> {
        self.client = None;
        tracing::debug!("HTTP session closed");
        Ok(())
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> NavigationError {
    if e.is_timeout() {
        NavigationError::Network("Request timeout".to_string())
    } else if e.is_connect() {
        NavigationError::Network(format!("Connection failed: {}", e))
    } else {
        NavigationError::Network(e.to_string())
    }
}

/// Checks a fetched document against the wait policy
///
/// The no-results selector is checked first, so a page that renders both an
/// empty-state banner and the result container counts as empty.
pub fn check_wait_policy(body: &str, url: &Url, wait: &WaitPolicy) -> Result<(), NavigationError> {
    if wait.ready_selector.is_none() && wait.no_results_selector.is_none() {
        return Ok(());
    }

    let document = Html::parse_document(body);

    if let Some(selector) = &wait.no_results_selector {
        if matches_any(&document, selector)? {
            return Err(NavigationError::NoResults(url.to_string()));
        }
    }

    if let Some(selector) = &wait.ready_selector {
        if !matches_any(&document, selector)? {
            return Err(NavigationError::ContentMissing {
                url: url.to_string(),
                selector: selector.clone(),
            });
        }
    }

    Ok(())
}

fn matches_any(document: &Html, selector: &str) -> Result<bool, NavigationError> {
    let parsed = Selector::parse(selector)
        .map_err(|e| NavigationError::Session(format!("Invalid selector '{}': {:?}", selector, e)))?;
    Ok(document.select(&parsed).next().is_some())
}
