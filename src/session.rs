use async_trait::async_trait;

use crate::error::AutomationError;
use crate::record::{DetailsCapture, RowCapture};

/// Result-set size reported by the search page before any worker starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    pub total_pages: u32,
    pub total_records: u64,
}

impl Discovery {
    /// Rows page `page` should show: full pages except possibly the last.
    pub fn expected_rows(&self, page: u32, page_size: u32) -> usize {
        let before = u64::from(page.saturating_sub(1)) * u64::from(page_size);
        let left = self.total_records.saturating_sub(before);
        left.min(u64::from(page_size)) as usize
    }
}

/// One browser tab positioned on the registration search results.
///
/// Every method is a suspension point for the worker that owns the
/// session; sessions are never shared between workers.
#[async_trait]
pub trait SearchSession: Send {
    type Row: Send + Sync;

    /// Navigate from scratch to the search results, re-establishing the
    /// term selection held in the session cookie.
    async fn open_search(&mut self) -> Result<(), AutomationError>;

    async fn discover(&mut self) -> Result<Discovery, AutomationError>;

    async fn select_page(&mut self, page: u32) -> Result<(), AutomationError>;

    /// Rows on the current page, once exactly `expected` are present.
    async fn rows(&mut self, expected: usize) -> Result<Vec<Self::Row>, AutomationError>;

    async fn capture_row(&mut self, row: &Self::Row) -> Result<RowCapture, AutomationError>;

    /// Open the detail dialog for `row`, read it, and close it again.
    async fn course_details(&mut self, row: &Self::Row) -> Result<DetailsCapture, AutomationError>;

    /// Close any dialog a failed detail lookup left open.
    async fn dismiss_overlay(&mut self) -> Result<(), AutomationError>;

    async fn close(&mut self);
}

/// Hands out independent sessions, one per worker.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: SearchSession + 'static;

    async fn open(&self) -> Result<Self::Session, AutomationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_page_holds_the_remainder() {
        let d = Discovery {
            total_pages: 3,
            total_records: 120,
        };
        assert_eq!(d.expected_rows(1, 50), 50);
        assert_eq!(d.expected_rows(2, 50), 50);
        assert_eq!(d.expected_rows(3, 50), 20);

        let even = Discovery {
            total_pages: 2,
            total_records: 100,
        };
        assert_eq!(even.expected_rows(2, 50), 50);
        assert_eq!(even.expected_rows(3, 50), 0);
    }
}
