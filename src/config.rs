use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::banner::Timeouts;
use crate::worker::RetryLimits;

pub const DEFAULT_CONFIG: &str = "term_scraper";
pub const ENV_PREFIX: &str = "TERM_SCRAPER";

const DEFAULT_SEARCH_URL: &str =
    "https://ssb1-reg.banner.marist.edu/StudentRegistrationSsb/ssb/term/termSelection?mode=search";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub search_url: String,
    pub headless: bool,
    pub workers: usize,
    pub max_page_retry: u32,
    pub max_row_retry: u32,
    pub flush_interval_ms: u64,
    pub page_size: u32,
    pub selector_timeout_ms: u64,
    pub detail_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub out_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            search_url: DEFAULT_SEARCH_URL.to_string(),
            headless: true,
            workers: 8,
            max_page_retry: 5,
            max_row_retry: 3,
            flush_interval_ms: 5_000,
            page_size: 50,
            selector_timeout_ms: 3_000,
            detail_timeout_ms: 2_000,
            navigation_timeout_ms: 10_000,
            out_dir: PathBuf::from("output"),
        }
    }
}

impl Settings {
    /// Defaults, then the config file, then `TERM_SCRAPER_*` variables.
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        if self.max_page_retry == 0 || self.max_row_retry == 0 {
            bail!("retry limits must be at least 1");
        }
        if self.flush_interval_ms == 0 {
            bail!("flush_interval_ms must be at least 1");
        }
        Ok(())
    }

    pub fn limits(&self) -> RetryLimits {
        RetryLimits {
            page_attempts: self.max_page_retry,
            row_attempts: self.max_row_retry,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            selector: Duration::from_millis(self.selector_timeout_ms),
            detail: Duration::from_millis(self.detail_timeout_ms),
            navigation: Duration::from_millis(self.navigation_timeout_ms),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Output directory for one term: the term with spaces removed.
    pub fn term_dir(&self, term: &str) -> PathBuf {
        self.out_dir.join(term.replace(' ', ""))
    }
}
