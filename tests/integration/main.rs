//! Integration tests for the harvester
//!
//! `harvest_tests` drives the crawl driver against a scripted in-memory site.
//! `http_tests` uses wiremock to run the HTTP provider end-to-end.

mod common;
mod harvest_tests;
mod http_tests;
