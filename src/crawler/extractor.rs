//! Listing and detail extraction
//!
//! This module turns pages into data:
//! - detail links from a listing page, resolved, filtered and deduplicated
//! - one [`Record`] from a detail page, driven by the configured fields

use crate::config::{Config, FieldConfig};
use crate::crawler::provider::Page;
use crate::output::Record;
use crate::url::{normalize_url, resolve_link};
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use url::Url;

/// Separator used when a field collects several matches
pub const MULTI_VALUE_SEPARATOR: &str = "; ";

/// Errors raised while extracting data from a page
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("Malformed page {url}: {message}")]
    Malformed { url: String, message: String },
}

/// Turns provider pages into frontier URLs and records
pub trait Extractor: Send + Sync {
    /// Detail URLs found on a listing page, in document order without duplicates
    ///
    /// An empty list means the listing has no more results.
    fn list_urls(&self, page: &Page) -> Result<Vec<Url>, ExtractError>;

    /// The record on a detail page, or `None` if a required field is missing
    fn extract_detail(&self, page: &Page) -> Result<Option<Record>, ExtractError>;
}

struct CompiledField {
    name: String,
    selector: Selector,
    attribute: Option<String>,
    required: bool,
    multiple: bool,
}

/// CSS-selector extractor built from `[listing]` and `[[detail.fields]]`
pub struct SelectorExtractor {
    link_selector: Selector,
    exclude_patterns: Vec<String>,
    normalize: bool,
    fields: Vec<CompiledField>,
}

impl SelectorExtractor {
    /// Compiles every selector in the configuration
    pub fn from_config(config: &Config) -> Result<Self, ExtractError> {
        let fields = config
            .detail
            .fields
            .iter()
            .map(compile_field)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            link_selector: compile(&config.listing.link_selector)?,
            exclude_patterns: config.listing.exclude_patterns.clone(),
            normalize: config.listing.normalize_urls,
            fields,
        })
    }

    /// Column names in configuration order
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    fn is_excluded(&self, url: &Url) -> bool {
        let url = url.as_str();
        self.exclude_patterns.iter().any(|p| url.contains(p.as_str()))
    }
}

impl Extractor for SelectorExtractor {
    fn list_urls(&self, page: &Page) -> Result<Vec<Url>, ExtractError> {
        let document = Html::parse_document(&page.body);
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for element in document.select(&self.link_selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };

            let Some(absolute) = resolve_link(href, &page.final_url) else {
                continue;
            };

            if self.is_excluded(&absolute) {
                tracing::trace!("Excluded link: {}", absolute);
                continue;
            }

            let url = if self.normalize {
                match normalize_url(absolute.as_str()) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::debug!("Skipping link {}: {}", absolute, e);
                        continue;
                    }
                }
            } else {
                absolute
            };

            if seen.insert(url.as_str().to_string()) {
                urls.push(url);
            }
        }

        Ok(urls)
    }

    fn extract_detail(&self, page: &Page) -> Result<Option<Record>, ExtractError> {
        let document = Html::parse_document(&page.body);
        let mut values = BTreeMap::new();

        for field in &self.fields {
            let matches: Vec<String> = document
                .select(&field.selector)
                .filter_map(|element| field_value(element, field, &page.final_url))
                .collect();

            let value = if field.multiple {
                let mut seen = HashSet::new();
                matches
                    .into_iter()
                    .filter(|v| seen.insert(v.clone()))
                    .collect::<Vec<_>>()
                    .join(MULTI_VALUE_SEPARATOR)
            } else {
                matches.into_iter().next().unwrap_or_default()
            };

            if field.required && value.is_empty() {
                tracing::debug!(
                    field = %field.name,
                    url = %page.url,
                    "Required field missing"
                );
                return Ok(None);
            }

            values.insert(field.name.clone(), value);
        }

        Ok(Some(Record::new(page.url.as_str(), values)))
    }
}

/// Text or attribute value of one match; empty values are dropped
fn field_value(element: ElementRef<'_>, field: &CompiledField, base: &Url) -> Option<String> {
    let value = match &field.attribute {
        Some(attribute) => {
            let raw = element.value().attr(attribute)?.trim();
            if matches!(attribute.as_str(), "href" | "src") {
                resolve_link(raw, base)
                    .map(String::from)
                    .unwrap_or_else(|| raw.to_string())
            } else {
                raw.to_string()
            }
        }
        None => collapse_whitespace(&element.text().collect::<String>()),
    };

    Some(value).filter(|v| !v.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn compile(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

fn compile_field(field: &FieldConfig) -> Result<CompiledField, ExtractError> {
    Ok(CompiledField {
        name: field.name.clone(),
        selector: compile(&field.selector)?,
        attribute: field.attribute.clone(),
        required: field.required,
        multiple: field.multiple,
    })
}
