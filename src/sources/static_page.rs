use anyhow::{Context, Result};
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{BatchConstraints, FetchOutcome, SearchQuery, SourceAdapter};
use crate::config::{HttpSettings, StaticSelectors, fill_template};
use crate::error::ScoutError;
use crate::models::ListingCandidate;

/// Query parameters that only track the click and never identify a job.
const TRACKING_PARAMS: &[&str] = &[
    "refId", "trackingId", "tk", "from", "advn", "vjs", "src", "ref", "fbclid", "gclid",
];

/// Fetches plain HTML result pages and cuts them into candidate blocks.
pub struct StaticPageAdapter {
    client: Client,
    settings: HttpSettings,
}

impl StaticPageAdapter {
    pub fn new(settings: HttpSettings, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, settings })
    }

    fn page_url(&self, query: &SearchQuery, page: usize) -> String {
        let page = (self.settings.first_page + page).to_string();
        fill_template(
            &self.settings.search_url,
            &[
                ("query", query.query.as_str()),
                ("location", query.location.as_str()),
                ("page", page.as_str()),
            ],
        )
    }

    /// GET with a fixed number of retries for transport errors, 429 and 5xx.
    /// Other statuses fail immediately.
    fn get_page(&self, url: &str) -> Result<String, ScoutError> {
        let attempts = self.settings.page_retries + 1;
        let mut last = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = self.settings.retry_backoff_ms * u64::from(attempt - 1);
                thread::sleep(Duration::from_millis(backoff));
            }
            match self.client.get(url).send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.text().map_err(|e| ScoutError::network(url, e));
                    }
                    last = format!("HTTP {}", status);
                    if !(status.is_server_error() || status.as_u16() == 429) {
                        break;
                    }
                }
                Err(e) => last = e.to_string(),
            }
            debug!(url, attempt, error = %last, "page fetch failed");
        }
        Err(ScoutError::network(url, last))
    }
}

impl SourceAdapter for StaticPageAdapter {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(
        &mut self,
        query: &SearchQuery,
        constraints: &BatchConstraints,
    ) -> Result<FetchOutcome> {
        let window = constraints.window.clone();
        let mut outcome = FetchOutcome::default();
        let mut found: Vec<ListingCandidate> = Vec::new();
        let mut seen = HashSet::new();
        let mut ran_out = false;

        for page in 0..self.settings.max_pages {
            if found.len() >= window.end {
                break;
            }
            if constraints.cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let url = self.page_url(query, page);
            info!(url = %url, "fetching results page");
            // Later pages would shift result indices, so a lost page ends
            // the pass.
            let html = match self.get_page(&url) {
                Ok(html) => html,
                Err(e) => {
                    warn!(error = %e, "page failed, stopping here");
                    outcome.degraded.push(e.to_string());
                    break;
                }
            };

            let blocks = parse_results(&html, &url, &self.settings.selectors);
            if blocks.is_empty() {
                ran_out = true;
                break;
            }
            for block in blocks {
                if seen.insert(block.source_url.clone()) {
                    found.push(block);
                }
            }
        }

        // A short result set only proves the end when no page was lost.
        if ran_out || (found.len() < window.end && outcome.degraded.is_empty()) {
            outcome.total_known = Some(found.len());
        }

        let end = window.end.min(found.len());
        let start = window.start.min(end);
        outcome.candidates = found.drain(start..end).collect();
        outcome.processed = outcome.candidates.len();
        Ok(outcome)
    }
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(selector = css, error = %e, "invalid selector");
            None
        }
    }
}

fn first_text(el: &ElementRef, sel: Option<&Selector>) -> Option<String> {
    let sel = sel?;
    el.select(sel)
        .map(|e| e.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
}

/// Cuts a results page into candidates. Blocks without a title or a link
/// are dropped; a missing company is left to the caller's placeholder.
pub fn parse_results(
    html: &str,
    page_url: &str,
    selectors: &StaticSelectors,
) -> Vec<ListingCandidate> {
    let document = Html::parse_document(html);
    let Some(block_sel) = selector(&selectors.block) else {
        return Vec::new();
    };
    let title_sel = selector(&selectors.title);
    let company_sel = selector(&selectors.company);
    let link_sel = selector(&selectors.link);
    let snippet_sel = selector(&selectors.snippet);
    let base = Url::parse(page_url).ok();

    let mut candidates = Vec::new();
    for block in document.select(&block_sel) {
        let Some(title) = first_text(&block, title_sel.as_ref()) else {
            continue;
        };
        let href = link_sel
            .as_ref()
            .and_then(|s| block.select(s).find_map(|a| a.value().attr("href")));
        let Some(url) = href.and_then(|h| canonical_url(base.as_ref(), h)) else {
            debug!(title = %title, "block without usable link");
            continue;
        };

        let company = first_text(&block, company_sel.as_ref());
        let raw_text = first_text(&block, snippet_sel.as_ref()).unwrap_or_else(|| {
            block
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        });

        candidates.push(ListingCandidate {
            title,
            company,
            raw_text,
            source_url: url,
            degraded: false,
        });
    }
    candidates
}

/// Resolves `href` against the page and strips tracking parameters so the
/// same job always gets the same key.
pub fn canonical_url(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") {
        return None;
    }
    let mut url = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&&**k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.to_string())
}
