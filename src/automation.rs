use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::AutomationError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Selector-level control of one browser tab.
///
/// `scope` limits a query to the descendants of an element; `None`
/// queries the whole document.
#[async_trait]
pub trait Automation: Send + Sync {
    type Element: Send + Sync;

    async fn navigate(&self, url: &str) -> Result<(), AutomationError>;

    async fn find_one(
        &self,
        scope: Option<&Self::Element>,
        selector: &str,
    ) -> Result<Option<Self::Element>, AutomationError>;

    async fn find_all(
        &self,
        scope: Option<&Self::Element>,
        selector: &str,
    ) -> Result<Vec<Self::Element>, AutomationError>;

    async fn click(&self, element: &Self::Element) -> Result<(), AutomationError>;

    /// Replace the element's value with `text`.
    async fn fill(&self, element: &Self::Element, text: &str) -> Result<(), AutomationError>;

    async fn press(&self, element: &Self::Element, key: &str) -> Result<(), AutomationError>;

    async fn select_option(&self, element: &Self::Element, value: &str) -> Result<(), AutomationError>;

    async fn text(&self, element: &Self::Element) -> Result<String, AutomationError>;

    async fn attribute(
        &self,
        element: &Self::Element,
        name: &str,
    ) -> Result<Option<String>, AutomationError>;

    /// Poll until `selector` matches, or fail with a timeout.
    async fn wait_for(
        &self,
        scope: Option<&Self::Element>,
        selector: &str,
        timeout: Duration,
    ) -> Result<Self::Element, AutomationError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_one(scope, selector).await? {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::Timeout {
                    selector: selector.to_string(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll until `selector` matches exactly `count` elements.
    async fn wait_for_count(
        &self,
        selector: &str,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<Self::Element>, AutomationError> {
        let deadline = Instant::now() + timeout;
        loop {
            let found = self.find_all(None, selector).await?;
            if found.len() == count {
                return Ok(found);
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::Timeout {
                    selector: format!("{selector} (x{count}, saw {})", found.len()),
                    waited: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&self);
}
