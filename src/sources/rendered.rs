use anyhow::{Context, Result, anyhow};
use std::thread;
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use url::Url;

use super::{BatchConstraints, FetchOutcome, SearchQuery, SourceAdapter};
use crate::config::{BrowserSettings, ExtractionSettings, PanelSelectors, fill_template};
use crate::error::ScoutError;
use crate::extraction::{
    ActivationTarget, BlockSummary, ExtractionMachine, ItemOutcome, Panel, Timing,
};
use crate::models::ListingCandidate;

/// Drives a WebDriver session over a results page whose items share one
/// detail panel.
pub struct RenderedAdapter {
    runtime: Runtime,
    settings: BrowserSettings,
    timing: Timing,
}

impl RenderedAdapter {
    pub fn new(settings: BrowserSettings, extraction: &ExtractionSettings) -> Result<Self> {
        let runtime = Runtime::new().context("Failed to start async runtime for the browser")?;
        Ok(Self {
            runtime,
            settings,
            timing: Timing::from_settings(extraction),
        })
    }

    fn connect(&self) -> Result<WebDriver> {
        self.runtime.block_on(async {
            let mut caps = DesiredCapabilities::chrome();
            if self.settings.headless {
                caps.set_headless()?;
            }
            caps.add_arg("--window-size=1400,1000")?;
            let driver = WebDriver::new(self.settings.webdriver_url.as_str(), caps).await?;
            anyhow::Ok(driver)
        })
    }

    fn search_url(&self, query: &SearchQuery) -> String {
        fill_template(
            &self.settings.search_url,
            &[("query", query.query.as_str()), ("location", query.location.as_str())],
        )
    }
}

impl SourceAdapter for RenderedAdapter {
    fn name(&self) -> &str {
        "browser"
    }

    fn fetch(
        &mut self,
        query: &SearchQuery,
        constraints: &BatchConstraints,
    ) -> Result<FetchOutcome> {
        let url = self.search_url(query);
        let mut outcome = FetchOutcome::default();

        let driver = match self.connect() {
            Ok(driver) => driver,
            Err(e) => {
                let err = ScoutError::network(&self.settings.webdriver_url, e);
                warn!(error = %err, "browser unavailable");
                outcome.degraded.push(err.to_string());
                return Ok(outcome);
            }
        };

        info!(url = %url, "opening results page");
        if let Err(e) = self.runtime.block_on(driver.goto(url.as_str())) {
            let err = ScoutError::network(&url, e);
            warn!(error = %err, "navigation failed");
            outcome.degraded.push(err.to_string());
            self.quit(driver);
            return Ok(outcome);
        }
        thread::sleep(Duration::from_secs(self.settings.page_load_secs));

        let report = {
            let mut panel = WebDriverPanel {
                runtime: &self.runtime,
                driver: &driver,
                selectors: &self.settings.selectors,
                base: page_base(&url),
                listing_url: &self.settings.listing_url,
                id_param: &self.settings.id_param,
            };
            let window = constraints.window.clone();
            ExtractionMachine::new(self.timing).run(&mut panel, window, &constraints.cancel)
        };
        debug!(blocks = report.total_blocks, "rendered blocks");
        self.quit(driver);

        outcome.skipped = report.skipped();
        outcome.processed = report.processed();
        outcome.cancelled = report.cancelled;
        // Fewer rendered blocks than the window asked for means the list
        // ended, unless counting itself failed.
        let counted = report.total_blocks > 0 || report.warnings.is_empty();
        if counted && report.total_blocks < constraints.window.end {
            outcome.total_known = Some(report.total_blocks);
        }
        outcome.degraded = report.warnings;
        for item in report.outcomes {
            if let ItemOutcome::Recorded(item) = item {
                outcome.candidates.push(ListingCandidate {
                    title: item.title,
                    company: item.company,
                    raw_text: item.description,
                    source_url: item.url,
                    degraded: item.degraded,
                });
            }
        }
        Ok(outcome)
    }
}

impl RenderedAdapter {
    fn quit(&self, driver: WebDriver) {
        if let Err(e) = self.runtime.block_on(driver.quit()) {
            debug!(error = %e, "closing browser session failed");
        }
    }
}

/// [`Panel`] over a live WebDriver page.
struct WebDriverPanel<'a> {
    runtime: &'a Runtime,
    driver: &'a WebDriver,
    selectors: &'a PanelSelectors,
    base: String,
    listing_url: &'a str,
    id_param: &'a str,
}

impl WebDriverPanel<'_> {
    fn block(&self, index: usize) -> Result<Option<WebElement>> {
        let blocks = self
            .runtime
            .block_on(self.driver.find_all(By::Css(self.selectors.block.as_str())))?;
        Ok(blocks.into_iter().nth(index))
    }

    fn frame_count(&self) -> usize {
        self.runtime
            .block_on(self.driver.find_all(By::Css(self.selectors.frames.as_str())))
            .map(|frames| frames.len())
            .unwrap_or(0)
    }
}

impl Panel for WebDriverPanel<'_> {
    fn block_count(&mut self) -> Result<usize> {
        let blocks = self
            .runtime
            .block_on(self.driver.find_all(By::Css(self.selectors.block.as_str())))?;
        Ok(blocks.len())
    }

    fn block_summary(&mut self, index: usize) -> Result<Option<BlockSummary>> {
        let Some(block) = self.block(index)? else {
            return Ok(None);
        };
        self.runtime.block_on(async {
            let title = match block.find(By::Css(self.selectors.block_title.as_str())).await {
                Ok(el) => el.text().await?,
                Err(_) => block.text().await?.lines().next().unwrap_or_default().to_string(),
            };
            let company = match block.find(By::Css(self.selectors.block_company.as_str())).await {
                Ok(el) => Some(el.text().await?.trim().to_string()).filter(|c| !c.is_empty()),
                Err(_) => None,
            };
            anyhow::Ok(Some(BlockSummary {
                title: title.trim().to_string(),
                company,
            }))
        })
    }

    fn activate(&mut self, index: usize, target: ActivationTarget) -> Result<()> {
        let block = self
            .block(index)?
            .ok_or_else(|| anyhow!("block {} is gone", index))?;
        self.runtime.block_on(async {
            match target {
                ActivationTarget::Block => {
                    block.scroll_into_view().await?;
                    block.click().await?;
                }
                ActivationTarget::Fallback => {
                    let inner = block.find(By::Css(self.selectors.block_fallback.as_str())).await?;
                    // Script dispatch gets past overlays that swallow real clicks.
                    self.driver
                        .execute("arguments[0].click();", vec![inner.to_json()?])
                        .await?;
                }
            }
            anyhow::Ok(())
        })
    }

    fn navigable_id(&mut self) -> Result<String> {
        let url = self.runtime.block_on(self.driver.current_url())?;
        Ok(identifier_from_url(&url, self.id_param))
    }

    fn expand_full_text(&mut self) -> Result<bool> {
        let selectors = &self.selectors.expand;
        if self.runtime.block_on(click_first(self.driver, selectors)) {
            return Ok(true);
        }
        for frame in 0..self.frame_count() {
            let clicked = self.runtime.block_on(async {
                self.driver.enter_frame(frame as u16).await?;
                let clicked = click_first(self.driver, selectors).await;
                self.driver.enter_default_frame().await?;
                anyhow::Ok(clicked)
            })?;
            if clicked {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn read_detail_text(&mut self) -> Result<Option<String>> {
        let selectors = &self.selectors.detail;
        if let Some(text) = self.runtime.block_on(longest_text(self.driver, selectors)) {
            return Ok(Some(text));
        }
        let mut best: Option<String> = None;
        for frame in 0..self.frame_count() {
            let found = self.runtime.block_on(async {
                self.driver.enter_frame(frame as u16).await?;
                let found = longest_text(self.driver, selectors).await;
                self.driver.enter_default_frame().await?;
                anyhow::Ok(found)
            })?;
            if let Some(text) = found {
                if best.as_ref().is_none_or(|b| text.len() > b.len()) {
                    best = Some(text);
                }
            }
        }
        Ok(best)
    }

    fn listing_url(&self, id: &str) -> String {
        listing_url(self.listing_url, &self.base, id)
    }

    fn pause(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clicks the first matching control. Lookup failures count as "not there".
async fn click_first(driver: &WebDriver, selectors: &[String]) -> bool {
    for selector in selectors {
        if let Ok(el) = driver.find(By::Css(selector.as_str())).await {
            if el.click().await.is_ok() {
                debug!(selector = %selector, "expanded full text");
                return true;
            }
        }
    }
    false
}

async fn longest_text(driver: &WebDriver, selectors: &[String]) -> Option<String> {
    let mut best: Option<String> = None;
    for selector in selectors {
        let Ok(elements) = driver.find_all(By::Css(selector.as_str())).await else {
            continue;
        };
        for el in elements {
            let Ok(text) = el.text().await else {
                continue;
            };
            let text = text.trim();
            if !text.is_empty() && best.as_ref().is_none_or(|b| text.len() > b.len()) {
                best = Some(text.to_string());
            }
        }
    }
    best
}

/// Fragment when present, otherwise the value of `id_param`.
fn identifier_from_url(url: &Url, id_param: &str) -> String {
    if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
        return fragment.to_string();
    }
    url.query_pairs()
        .find(|(k, _)| k == id_param)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// An identifier that is already a full URL is used as is.
fn listing_url(template: &str, base: &str, id: &str) -> String {
    if Url::parse(id).is_ok_and(|u| u.has_host()) {
        return id.to_string();
    }
    template.replace("{base}", base).replace("{id}", id)
}

/// Origin and path of the results page. The search terms stay out of
/// listing keys.
fn page_base(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}
