use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const SETTINGS_FILE: &str = "settings.json";
pub const PROFILE_FILE: &str = "profile.json";
pub const LISTINGS_FILE: &str = "listings.json";
pub const CURSOR_FILE: &str = "cursor.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub batch_size: usize,
    pub user_agent: String,
    pub http: HttpSettings,
    pub browser: BrowserSettings,
    pub extraction: ExtractionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: None,
            batch_size: 3,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) scout/0.1".to_string(),
            http: HttpSettings::default(),
            browser: BrowserSettings::default(),
            extraction: ExtractionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Search endpoint with `{query}`, `{location}` and `{page}` placeholders.
    pub search_url: String,
    pub timeout_secs: u64,
    pub page_retries: u32,
    /// Pause before retry `n` is `n` times this.
    pub retry_backoff_ms: u64,
    pub max_pages: usize,
    pub first_page: usize,
    pub selectors: StaticSelectors,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            search_url: "https://www.indeed.com/jobs?q={query}&l={location}&start={page}0"
                .to_string(),
            timeout_secs: 20,
            page_retries: 2,
            retry_backoff_ms: 500,
            max_pages: 5,
            first_page: 0,
            selectors: StaticSelectors::default(),
        }
    }
}

/// CSS selectors for a static results page. Site specific, so they live in
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticSelectors {
    pub block: String,
    pub title: String,
    pub company: String,
    pub link: String,
    pub snippet: String,
}

impl Default for StaticSelectors {
    fn default() -> Self {
        Self {
            block: "div.job_seen_beacon, li.job-result, article.job".to_string(),
            title: "h2 a, h2, .jobTitle, .job-title".to_string(),
            company: "[data-testid='company-name'], .companyName, .company".to_string(),
            link: "h2 a[href], a.jcs-JobTitle[href], a[href]".to_string(),
            snippet: ".job-snippet, .summary, p".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    /// Search page with `{query}` and `{location}` placeholders.
    pub search_url: String,
    /// How a navigable identifier becomes a listing URL. `{base}` is the
    /// search page reduced to origin and path, `{id}` the identifier.
    pub listing_url: String,
    /// Query parameter holding the selected item when the page keeps it
    /// out of the fragment.
    pub id_param: String,
    pub page_load_secs: u64,
    pub selectors: PanelSelectors,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            search_url: "https://www.getonbrd.com/jobs?q={query}&location={location}".to_string(),
            listing_url: "{base}#{id}".to_string(),
            id_param: "currentJobId".to_string(),
            page_load_secs: 5,
            selectors: PanelSelectors::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSelectors {
    pub block: String,
    pub block_title: String,
    pub block_company: String,
    /// Tried when dispatching on the block itself fails.
    pub block_fallback: String,
    pub expand: Vec<String>,
    pub detail: Vec<String>,
    pub frames: String,
}

impl Default for PanelSelectors {
    fn default() -> Self {
        Self {
            block: "li.jobs-search-results__list-item, div.job-card-container".to_string(),
            block_title: ".job-card-list__title, h3, a".to_string(),
            block_company: ".job-card-container__company-name, h4".to_string(),
            block_fallback: "a, button".to_string(),
            expand: vec![
                "button.show-more-less-html__button".to_string(),
                "button.show-more-less-html__button--more".to_string(),
                ".jobs-description__footer-button".to_string(),
                "button[aria-label*='Show more']".to_string(),
                "button[aria-label*='See more']".to_string(),
            ],
            detail: vec![
                ".jobs-description__content".to_string(),
                ".jobs-box__html-content".to_string(),
                ".show-more-less-html__markup".to_string(),
                ".description__text".to_string(),
                "#job-details".to_string(),
                "article".to_string(),
            ],
            frames: "iframe".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub target_timeout_ms: u64,
    pub expand_wait_ms: u64,
    pub detail_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Descriptions at or below this many characters are not accepted.
    pub min_description_chars: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            target_timeout_ms: 4000,
            expand_wait_ms: 800,
            detail_timeout_ms: 3000,
            poll_interval_ms: 250,
            min_description_chars: 100,
        }
    }
}

impl ExtractionSettings {
    pub fn target_timeout(&self) -> Duration {
        Duration::from_millis(self.target_timeout_ms)
    }

    pub fn expand_wait(&self) -> Duration {
        Duration::from_millis(self.expand_wait_ms)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_millis(self.detail_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_default() -> Self {
        Self::load(&config_dir().join(SETTINGS_FILE))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn profile_path(&self) -> PathBuf {
        self.data_dir().join(PROFILE_FILE)
    }

    pub fn listings_path(&self) -> PathBuf {
        self.data_dir().join(LISTINGS_FILE)
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.data_dir().join(CURSOR_FILE)
    }
}

fn default_data_dir() -> PathBuf {
    // Use XDG data directory or fallback
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "scout") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".")
    }
}

fn config_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "scout") {
        proj_dirs.config_dir().to_path_buf()
    } else {
        PathBuf::from(".")
    }
}

/// Fills `{key}` placeholders in a URL template with percent-encoded values.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
        out = out.replace(&format!("{{{}}}", key), &encoded);
    }
    out
}
