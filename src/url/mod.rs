//! URL handling module for Page-Harvest
//!
//! This module provides URL normalization for frontier deduplication, link
//! resolution against the page a link was found on, and construction of
//! numbered listing-page URLs.

mod normalize;

use crate::UrlError;
use url::Url;

pub use normalize::normalize_url;

/// Builds the URL of a numbered listing page
///
/// The page number is written into the `page_param` query parameter, replacing
/// any value already present in the base listing URL. The rest of the query
/// is kept exactly as written, including its percent-escapes and order.
///
/// # Examples
///
/// ```
/// use page_harvest::url::listing_page_url;
///
/// let url = listing_page_url("https://example.com/search?q=&sort=date", "page", 3).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/search?q=&sort=date&page=3");
/// ```
pub fn listing_page_url(base: &str, page_param: &str, page: u32) -> Result<Url, UrlError> {
    let mut url = Url::parse(base).map_err(|e| UrlError::Parse(e.to_string()))?;

    let mut segments: Vec<String> = url
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| segment.split('=').next() != Some(page_param))
        .map(String::from)
        .collect();
    segments.push(format!("{}={}", page_param, page));

    url.set_query(Some(&segments.join("&")));

    Ok(url)
}

/// Resolves a link href to an absolute URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute)
        }
        _ => None,
    }
}
