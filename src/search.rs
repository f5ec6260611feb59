//! Image search adapters
//!
//! Given a free-text term and a result cap, a provider returns image source URLs in
//! provider order. An empty result is a normal outcome, not an error.

use crate::config::{SafeSearch, SearchConfig};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::header::REFERER;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

const DDG_HOME_URL: &str = "https://duckduckgo.com/";
const DDG_IMAGES_URL: &str = "https://duckduckgo.com/i.js";
const DDG_MAX_PAGES: usize = 5;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

/// Source of image URLs for a query term
#[async_trait]
pub trait ImageSearchProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Return at most `max_images` distinct image URLs for `term`
    ///
    /// # Errors
    /// - `PipelineError::Search` when the provider cannot be queried
    async fn search(&self, term: &str, max_images: usize) -> Result<Vec<String>>;
}

/// Build the provider described by the configuration
///
/// # Errors
/// - Failed to create the HTTP client
pub fn provider_from_config(
    config: &SearchConfig,
    timeout: Duration,
) -> Result<Box<dyn ImageSearchProvider>> {
    match config {
        SearchConfig::DuckDuckGo { region, safesearch } => Ok(Box::new(DuckDuckGoSearch::new(
            region.clone(),
            *safesearch,
            timeout,
        )?)),
        SearchConfig::Static { urls } => Ok(Box::new(StaticSearch::new(urls.clone()))),
    }
}

/// Keep first occurrences only and stop at `max`
fn collect_distinct<I: IntoIterator<Item = String>>(urls: I, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| !url.trim().is_empty())
        .filter(|url| seen.insert(url.clone()))
        .take(max)
        .collect()
}

/// `DuckDuckGo` image search over its JSON endpoint
#[derive(Debug)]
pub struct DuckDuckGoSearch {
    client: Client,
    region: String,
    safesearch: SafeSearch,
}

#[derive(Debug, Deserialize)]
struct ImagesPage {
    #[serde(default)]
    results: Vec<ImageResult>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResult {
    image: Option<String>,
}

impl DuckDuckGoSearch {
    /// Create a new `DuckDuckGo` client
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new<S: Into<String>>(region: S, safesearch: SafeSearch, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| PipelineError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            region: region.into(),
            safesearch,
        })
    }

    /// Fetch the per-query `vqd` token the image endpoint requires
    async fn fetch_vqd(&self, term: &str) -> Result<String> {
        let response = self
            .client
            .get(DDG_HOME_URL)
            .query(&[("q", term)])
            .send()
            .await
            .map_err(|e| PipelineError::search(format!("Failed to query DuckDuckGo: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::search(format!(
                "DuckDuckGo returned HTTP {} while fetching search token",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::search(format!("Failed to read DuckDuckGo response: {}", e)))?;

        extract_vqd(&html).ok_or_else(|| {
            PipelineError::search(format!("Could not extract search token for '{}'", term))
        })
    }

    async fn fetch_page(&self, term: &str, vqd: &str, offset: Option<&str>) -> Result<ImagesPage> {
        let mut query: Vec<(&str, String)> = vec![
            ("l", self.region.clone()),
            ("o", "json".to_string()),
            ("q", term.to_string()),
            ("vqd", vqd.to_string()),
            ("f", ",,,,,".to_string()),
            ("p", self.safesearch.as_param().to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("s", offset.to_string()));
        }

        let response = self
            .client
            .get(DDG_IMAGES_URL)
            .query(&query)
            .header(REFERER, DDG_HOME_URL)
            .send()
            .await
            .map_err(|e| PipelineError::search(format!("Image search request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::search(format!(
                "Image search returned HTTP {} for '{}'",
                response.status(),
                term
            )));
        }

        response
            .json::<ImagesPage>()
            .await
            .map_err(|e| PipelineError::search(format!("Malformed image search response: {}", e)))
    }
}

#[async_trait]
impl ImageSearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, term: &str, max_images: usize) -> Result<Vec<String>> {
        if max_images == 0 {
            return Ok(Vec::new());
        }

        let vqd = self.fetch_vqd(term).await?;
        let mut found = Vec::new();
        let mut offset: Option<String> = None;

        for page_number in 0..DDG_MAX_PAGES {
            let page = self.fetch_page(term, &vqd, offset.as_deref()).await?;
            log::debug!(
                "Search page {} for '{}' returned {} results",
                page_number + 1,
                term,
                page.results.len()
            );

            found.extend(page.results.into_iter().filter_map(|r| r.image));
            let distinct = collect_distinct(found.clone(), max_images);
            if distinct.len() >= max_images {
                return Ok(distinct);
            }

            match page.next.as_deref().and_then(next_offset) {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(collect_distinct(found, max_images))
    }
}

/// Pull the `vqd` token out of the search landing page
fn extract_vqd(html: &str) -> Option<String> {
    const PATTERNS: &[(&str, char)] = &[("vqd=\"", '"'), ("vqd='", '\''), ("vqd=", '&')];

    for (open, close) in PATTERNS {
        if let Some(start) = html.find(open) {
            let rest = html.get(start + open.len()..)?;
            if let Some(end) = rest.find(*close) {
                let token = rest.get(..end)?;
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}

/// Read the `s` (offset) parameter from a `next` link such as `i.js?q=x&s=100`
fn next_offset(next: &str) -> Option<String> {
    let query = next.split_once('?').map_or(next, |(_, q)| q);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "s")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Provider backed by fixed URL lists, keyed by query term
#[derive(Debug, Clone, Default)]
pub struct StaticSearch {
    urls: BTreeMap<String, Vec<String>>,
}

impl StaticSearch {
    #[must_use]
    pub fn new(urls: BTreeMap<String, Vec<String>>) -> Self {
        Self { urls }
    }

    /// Register the URLs returned for `term`
    #[must_use]
    pub fn with_term<S: Into<String>>(mut self, term: S, urls: Vec<String>) -> Self {
        self.urls.insert(term.into(), urls);
        self
    }
}

#[async_trait]
impl ImageSearchProvider for StaticSearch {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, term: &str, max_images: usize) -> Result<Vec<String>> {
        let urls = self.urls.get(term).cloned().unwrap_or_default();
        Ok(collect_distinct(urls, max_images))
    }
}
