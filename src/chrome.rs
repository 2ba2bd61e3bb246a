use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::automation::Automation;
use crate::banner::{BannerSession, Timeouts};
use crate::error::AutomationError;
use crate::session::SessionFactory;

/// A Chromium process shared by every worker of a run. Each worker gets
/// its own tab.
pub struct Chrome {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl Chrome {
    pub async fn launch(headless: bool) -> Result<Self> {
        let mut builder = BrowserConfig::builder();
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| anyhow!("Invalid browser config: {}", e))?;
        let (browser, mut events) = Browser::launch(config)
            .await
            .context("Failed to launch Chromium")?;

        // The CDP connection only makes progress while its handler is polled.
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {}", e);
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
        })
    }

    pub async fn new_tab(&self) -> Result<ChromeTab, AutomationError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(backend)?;
        Ok(ChromeTab { page })
    }

    pub async fn shutdown(self) {
        let mut browser = self.browser.into_inner();
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        let _ = browser.wait().await;
        self.handler.abort();
    }
}

pub struct ChromeTab {
    page: Page,
}

/// Map a CDP error, treating a dead connection or target as the end of
/// the session and everything else with `transient`.
fn classify(e: CdpError, transient: impl FnOnce(String) -> AutomationError) -> AutomationError {
    match e {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => AutomationError::SessionClosed,
        other => transient(other.to_string()),
    }
}

fn stale(e: CdpError) -> AutomationError {
    classify(e, AutomationError::Stale)
}

fn backend(e: CdpError) -> AutomationError {
    classify(e, AutomationError::Backend)
}

#[async_trait]
impl Automation for ChromeTab {
    type Element = Element;

    async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| classify(e, |msg| AutomationError::Navigation(format!("{url}: {msg}"))))?;
        Ok(())
    }

    async fn find_one(&self, scope: Option<&Element>, selector: &str) -> Result<Option<Element>, AutomationError> {
        Ok(self.find_all(scope, selector).await?.into_iter().next())
    }

    async fn find_all(&self, scope: Option<&Element>, selector: &str) -> Result<Vec<Element>, AutomationError> {
        let found = match scope {
            Some(el) => el.find_elements(selector).await.map_err(stale)?,
            None => self.page.find_elements(selector).await.map_err(backend)?,
        };
        Ok(found)
    }

    async fn click(&self, element: &Element) -> Result<(), AutomationError> {
        element.click().await.map_err(stale)?;
        Ok(())
    }

    async fn fill(&self, element: &Element, text: &str) -> Result<(), AutomationError> {
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(stale)?;
        element.focus().await.map_err(stale)?;
        element.type_str(text).await.map_err(stale)?;
        Ok(())
    }

    async fn press(&self, element: &Element, key: &str) -> Result<(), AutomationError> {
        element.press_key(key).await.map_err(stale)?;
        Ok(())
    }

    async fn select_option(&self, element: &Element, value: &str) -> Result<(), AutomationError> {
        let value = serde_json::to_string(value).map_err(|e| AutomationError::Backend(e.to_string()))?;
        let js = format!(
            "function() {{ this.value = {value}; this.dispatchEvent(new Event('change', {{ bubbles: true }})); }}"
        );
        element.call_js_fn(js, false).await.map_err(stale)?;
        Ok(())
    }

    async fn text(&self, element: &Element) -> Result<String, AutomationError> {
        Ok(element.inner_text().await.map_err(stale)?.unwrap_or_default())
    }

    async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>, AutomationError> {
        element.attribute(name).await.map_err(stale)
    }

    async fn close(&self) {
        if let Err(e) = self.page.clone().close().await {
            debug!("Failed to close tab: {}", e);
        }
    }
}

/// Opens Banner search sessions for one term, each in a fresh tab.
pub struct BannerTabs {
    pub chrome: Arc<Chrome>,
    pub search_url: String,
    pub term: String,
    pub page_size: u32,
    pub timeouts: Timeouts,
}

#[async_trait]
impl SessionFactory for BannerTabs {
    type Session = BannerSession<ChromeTab>;

    async fn open(&self) -> Result<Self::Session, AutomationError> {
        let tab = self.chrome.new_tab().await?;
        Ok(BannerSession::new(
            tab,
            &self.search_url,
            &self.term,
            self.page_size,
            self.timeouts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_connection_ends_the_session() {
        assert!(matches!(stale(CdpError::NoResponse), AutomationError::SessionClosed));
        assert!(!backend(CdpError::NoResponse).is_transient());
    }

    #[test]
    fn page_level_errors_stay_transient() {
        let e = stale(CdpError::NotFound);
        assert!(matches!(e, AutomationError::Stale(_)));
        assert!(e.is_transient());
        assert!(matches!(backend(CdpError::Timeout), AutomationError::Backend(_)));
        assert!(matches!(
            classify(CdpError::ChromeMessage("net::ERR_ABORTED".into()), AutomationError::Navigation),
            AutomationError::Navigation(_)
        ));
    }
}
