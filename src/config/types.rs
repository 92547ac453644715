use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Page-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listing: ListingConfig,
    pub detail: DetailConfig,
    pub limits: LimitsConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Paginated listing endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Base listing URL; the page number is added as a query parameter
    pub url: String,

    /// Name of the page-number query parameter
    #[serde(rename = "page-param", default = "default_page_param")]
    pub page_param: String,

    /// First listing page to request
    #[serde(rename = "start-page", default = "default_start_page")]
    pub start_page: u32,

    /// Detail links expected on a full listing page
    #[serde(rename = "items-per-page", default = "default_items_per_page")]
    pub items_per_page: u32,

    /// Listing pages visited between two batch delays
    #[serde(rename = "page-batch-size", default = "default_page_batch_size")]
    pub page_batch_size: u32,

    /// Selector that appears once listing content has loaded
    #[serde(rename = "ready-selector")]
    pub ready_selector: String,

    /// Selector that appears when the listing has run out of results
    #[serde(rename = "no-results-selector", default)]
    pub no_results_selector: Option<String>,

    /// Selector matching detail links on a listing page
    #[serde(rename = "link-selector")]
    pub link_selector: String,

    /// Links containing any of these substrings are dropped
    #[serde(rename = "exclude-patterns", default)]
    pub exclude_patterns: Vec<String>,

    /// Deadline for one listing page (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_listing_timeout_ms")]
    pub timeout_ms: u64,

    /// Normalize discovered links before adding them to the frontier
    #[serde(rename = "normalize-urls", default = "default_true")]
    pub normalize_urls: bool,
}

/// Detail page configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetailConfig {
    /// Selector that appears once detail content has loaded
    #[serde(rename = "ready-selector", default)]
    pub ready_selector: Option<String>,

    /// Deadline for one detail page (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_detail_timeout_ms")]
    pub timeout_ms: u64,

    /// Fields extracted from each detail page, in CSV column order
    pub fields: Vec<FieldConfig>,
}

/// One extracted field
#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    /// Column name
    pub name: String,

    /// CSS selector locating the value
    pub selector: String,

    /// Read this attribute instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,

    /// A record missing this field counts as a failed attempt
    #[serde(default)]
    pub required: bool,

    /// Join every match with "; " instead of taking the first
    #[serde(default)]
    pub multiple: bool,
}

/// Harvest size and checkpoint cadence
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Number of detail records to harvest
    #[serde(rename = "max-items")]
    pub max_items: u32,

    /// Save the checkpoint every N extracted items
    #[serde(rename = "checkpoint-interval", default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,

    /// Give URLs that exhausted their retries another chance on later runs
    #[serde(rename = "retry-failed-on-resume", default = "default_true")]
    pub retry_failed_on_resume: bool,
}

/// Politeness delays
#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    /// Base delay after each extracted item, scaled by 1.5 to 2.5 (milliseconds)
    #[serde(rename = "item-delay-ms", default = "default_item_delay_ms")]
    pub item_delay_ms: u64,

    /// Lower bound of the delay between listing page groups (milliseconds)
    #[serde(rename = "batch-delay-min-ms", default = "default_batch_delay_min_ms")]
    pub batch_delay_min_ms: u64,

    /// Upper bound of the delay between listing page groups (milliseconds)
    #[serde(rename = "batch-delay-max-ms", default = "default_batch_delay_max_ms")]
    pub batch_delay_max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            item_delay_ms: default_item_delay_ms(),
            batch_delay_min_ms: default_batch_delay_min_ms(),
            batch_delay_max_ms: default_batch_delay_max_ms(),
        }
    }
}

/// Per-item retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts per item, including the first
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay after the first failed attempt (milliseconds)
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for any backoff delay (milliseconds)
    #[serde(rename = "backoff-max-ms", default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Growth factor between consecutive backoff delays
    #[serde(rename = "backoff-multiplier", default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory holding the frontier, ledgers and checkpoint
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,

    /// Directory holding `batch-NNN.json` archives
    #[serde(rename = "batch-dir")]
    pub batch_dir: PathBuf,

    /// Append-only CSV of extracted records
    #[serde(rename = "csv-path")]
    pub csv_path: PathBuf,

    /// Records per archived batch
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: u32,

    /// Store each extracted record in the visited ledger as well
    #[serde(rename = "audit-payloads", default)]
    pub audit_payloads: bool,
}

/// Page provider session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// User agent sent with every request
    #[serde(rename = "user-agent", default)]
    pub user_agent: Option<String>,

    /// Environment variables that must be set before a session starts
    #[serde(rename = "required-env", default)]
    pub required_env: Vec<String>,

    /// Environment variable holding a bearer token
    #[serde(rename = "auth-token-env", default)]
    pub auth_token_env: Option<String>,

    /// Environment variable consulted when neither --headless nor --headed is given
    #[serde(rename = "headless-env", default = "default_headless_env")]
    pub headless_env: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            required_env: Vec::new(),
            auth_token_env: None,
            headless_env: default_headless_env(),
        }
    }
}

/// State storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

/// Which state store implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON document per store
    #[default]
    Json,

    /// A single SQLite database
    Sqlite,
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_start_page() -> u32 {
    1
}

fn default_items_per_page() -> u32 {
    50
}

fn default_page_batch_size() -> u32 {
    1
}

fn default_listing_timeout_ms() -> u64 {
    60_000
}

fn default_detail_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_checkpoint_interval() -> u32 {
    10
}

fn default_item_delay_ms() -> u64 {
    2_000
}

fn default_batch_delay_min_ms() -> u64 {
    2_000
}

fn default_batch_delay_max_ms() -> u64 {
    4_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_batch_size() -> u32 {
    50
}

fn default_headless_env() -> String {
    "HEADLESS".to_string()
}
