//! End-to-end tests of the HTTP page provider
//!
//! These tests use wiremock to serve listing and detail pages and run the
//! full harvest cycle over real HTTP.

use crate::common::{csv_lines, TestConfig};
use page_harvest::config::{Config, SessionEnv};
use page_harvest::crawler::{harvest, inspect, HarvestOptions, ShutdownSignal};
use page_harvest::storage::open_state_store;
use page_harvest::RunMode;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(body.to_string())
}

async fn mount_page(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html(body))
        .mount(server)
        .await;
}

async fn mount_listing(server: &MockServer, page: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", page))
        .respond_with(html(body))
        .mount(server)
        .await;
}

fn http_config(server: &MockServer, dir: &Path, max_items: u32, per_page: u32) -> Config {
    let mut builder = TestConfig::new(max_items, per_page);
    builder.listing_url = format!("{}/search?q=experts", server.uri());
    builder.build(dir)
}

fn options() -> HarvestOptions {
    HarvestOptions {
        mode: RunMode::Normal,
        headless: true,
        config_hash: Some("test-hash".to_string()),
        session_env: SessionEnv::default(),
    }
}

const LISTING_PAGE: &str = r#"
<div role="tabpanel">
  <h5><a href="/people/jane">Jane</a></h5>
  <h5><a href="/people/omar?utm_source=listing">Omar</a></h5>
  <h5><a href="/media-outlet/daily">Daily</a></h5>
  <h5><a href="/people/lee">Lee</a></h5>
</div>
"#;

#[tokio::test]
async fn test_http_harvest_writes_csv_rows() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();
    let config = http_config(&server, dir.path(), 3, 3);

    mount_listing(&server, "1", LISTING_PAGE).await;
    mount_page(
        &server,
        "/people/jane",
        r#"<h1>Doe, Jane</h1><p class="title">Says "hi"</p>"#,
    )
    .await;
    mount_page(&server, "/people/omar", r#"<h1>Omar</h1><p class="title">Analyst</p>"#).await;
    mount_page(&server, "/people/lee", "<h1>Lee</h1>").await;

    let outcome = harvest(&config, options(), ShutdownSignal::never())
        .await
        .unwrap();

    assert!(!outcome.is_interrupted());
    assert_eq!(outcome.summary().pages_requested, 1);
    assert_eq!(outcome.summary().succeeded, 3);
    assert_eq!(outcome.summary().filled("title"), Some(2));

    assert_eq!(
        csv_lines(&config),
        vec![
            "name,title,url".to_string(),
            format!("\"Doe, Jane\",\"Says \"\"hi\"\"\",{}/people/jane", base),
            format!("Omar,Analyst,{}/people/omar", base),
            format!("Lee,,{}/people/lee", base),
        ]
    );

    let store = open_state_store(&config).unwrap();
    let checkpoint = store.load_checkpoint().unwrap();
    assert_eq!(checkpoint.config_hash.as_deref(), Some("test-hash"));
    assert!(!store
        .load_frontier()
        .unwrap()
        .iter()
        .any(|u| u.contains("media-outlet") || u.contains("utm_source")));
}

#[tokio::test]
async fn test_http_bearer_token_is_sent() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = http_config(&server, dir.path(), 1, 1);

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(header("authorization", "Bearer t0k3n"))
        .respond_with(html(r#"<h5><a href="/people/jane">Jane</a></h5>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/people/jane"))
        .and(header("authorization", "Bearer t0k3n"))
        .respond_with(html("<h1>Jane</h1>"))
        .mount(&server)
        .await;

    let mut options = options();
    options.session_env.auth_token = Some("t0k3n".to_string());

    let outcome = harvest(&config, options, ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(outcome.summary().succeeded, 1);
}

#[tokio::test]
async fn test_http_server_errors_are_retried_then_recorded() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();
    let config = http_config(&server, dir.path(), 1, 1);

    mount_listing(&server, "1", r#"<h5><a href="/people/down">Down</a></h5>"#).await;
    Mock::given(method("GET"))
        .and(path("/people/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let outcome = harvest(&config, options(), ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(outcome.summary().failed, 1);

    let store = open_state_store(&config).unwrap();
    let failure = store
        .get_failure(&format!("{}/people/down", base))
        .unwrap()
        .unwrap();
    assert_eq!(failure.attempt_count, 3);
    assert!(failure.last_error.contains("503"));
}

#[tokio::test]
async fn test_http_missing_listing_content_ends_collection() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = http_config(&server, dir.path(), 6, 3);

    mount_listing(&server, "1", LISTING_PAGE).await;
    mount_listing(&server, "2", "<p>Nothing to see</p>").await;
    for person in ["jane", "omar", "lee"] {
        mount_page(&server, &format!("/people/{}", person), "<h1>Someone</h1>").await;
    }

    let outcome = harvest(&config, options(), ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(outcome.summary().pages_requested, 2);
    assert_eq!(outcome.summary().urls_collected, 3);
    assert_eq!(outcome.summary().succeeded, 3);
}

#[tokio::test]
async fn test_inspect_extracts_without_touching_state() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = http_config(&server, dir.path(), 1, 1);

    mount_page(&server, "/people/jane", r#"<h1>Jane</h1><p class="title">Editor</p>"#).await;

    let url = format!("{}/people/jane", server.uri());
    let record = inspect(&config, &url, &SessionEnv::default(), true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.field("name"), Some("Jane"));
    assert_eq!(record.field("title"), Some("Editor"));
    assert!(!config.output.state_dir.exists());
    assert!(!config.output.csv_path.exists());
}
