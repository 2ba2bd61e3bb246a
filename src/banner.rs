//! Selectors and navigation for the Banner student registration search.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::Instant;
use tracing::debug;

use crate::automation::Automation;
use crate::error::AutomationError;
use crate::record::{DetailsCapture, RowCapture};
use crate::session::{Discovery, SearchSession};

static LEADING_INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d,]*").unwrap());

const TERM_PICKER: &str = r#"div[id="s2id_txt_term"]"#;
const TERM_INPUT: &str = r#"input[id="s2id_autogen1_search"]"#;
const TERM_OPTION: &str = r#"li[role="presentation"]"#;
const TERM_GO: &str = r#"button[id="term-go"]"#;
const SEARCH_GO: &str = r#"button[id="search-go"]"#;
const PAGE_SIZE_SELECT: &str = r#"select[class="page-size-select"]"#;
const TOTAL_PAGES: &str = r#"span[class="paging-text total-pages"]"#;
const RESULT_COUNT: &str = r#"span[class="results-out-of"]"#;
const PAGE_INPUT: &str = r#"input[title="Page"]"#;
const RESULT_ROW: &str = "tr[data-id]";
const RENDER_POLL: Duration = Duration::from_millis(100);

const CELL_TITLE: &str = r#"td[xe-field="courseTitle"]"#;
const CELL_SUBJECT: &str = r#"td[xe-field="subject"]"#;
const CELL_NUMBER: &str = r#"td[xe-field="courseNumber"]"#;
const CELL_SECTION: &str = r#"td[xe-field="sequenceNumber"]"#;
const CELL_INSTRUCTOR: &str = r#"td[xe-field="instructor"] a.email"#;
const CELL_CAMPUS: &str = r#"td[xe-field="campus"]"#;
const CELL_STATUS: &str = r#"td[xe-field="status"]"#;
const CELL_MEETINGS: &str = r#"td[xe-field="meetingTime"]"#;
const MEETING_BLOCK: &str = r#"div[class="meeting"]"#;

const DETAILS_LINK: &str = r#"a[class="section-details-link"]"#;
const DETAILS_DIALOG: &str = r#"div[id="classDetailsContentDetailsDiv"]"#;
const DIALOG_CLOSE: &str = r#"button[class="primary-button small-button"]"#;
const CO_REQ_TAB: &str = r#"h3[id="coReqs"]"#;
const CO_REQ_PANEL: &str = r#"section[aria-labelledby="coReqs"]"#;
const PRE_REQ_TAB: &str = r#"h3[id="preReqs"]"#;
const PRE_REQ_PANEL: &str = r#"section[aria-labelledby="preReqs"]"#;
const CATALOG_TAB: &str = r#"h3[id="catalog"]"#;
const CATALOG_PANEL: &str = r#"section[aria-labelledby="catalog"]"#;

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Controls on an already loaded results page.
    pub selector: Duration,
    /// The course detail dialog and its tabs.
    pub detail: Duration,
    /// The term selection and search flow.
    pub navigation: Duration,
}

/// One tab driven through the registration search for a single term.
pub struct BannerSession<A: Automation> {
    tab: A,
    search_url: String,
    term: String,
    page_size: u32,
    timeouts: Timeouts,
    /// Results page currently on screen, if known.
    current_page: Option<u32>,
}

impl<A: Automation> BannerSession<A> {
    pub fn new(tab: A, search_url: &str, term: &str, page_size: u32, timeouts: Timeouts) -> Self {
        Self {
            tab,
            search_url: search_url.to_string(),
            term: term.to_string(),
            page_size,
            timeouts,
            current_page: None,
        }
    }

    async fn first_row_id(&self) -> Result<Option<String>, AutomationError> {
        match self.tab.find_one(None, RESULT_ROW).await? {
            Some(row) => self.tab.attribute(&row, "data-id").await,
            None => Ok(None),
        }
    }

    /// Poll until the first result row is no longer `before`.
    async fn wait_for_rerender(&self, before: &str) -> Result<(), AutomationError> {
        let deadline = Instant::now() + self.timeouts.selector;
        loop {
            match self.first_row_id().await? {
                Some(id) if id != before => return Ok(()),
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::Timeout {
                    selector: format!("{RESULT_ROW} (first row still {before})"),
                    waited: self.timeouts.selector,
                });
            }
            tokio::time::sleep(RENDER_POLL).await;
        }
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), AutomationError> {
        let el = self.tab.wait_for(None, selector, timeout).await?;
        self.tab.click(&el).await
    }

    async fn text_of(&self, selector: &str) -> Result<String, AutomationError> {
        let el = self.tab.wait_for(None, selector, self.timeouts.navigation).await?;
        self.tab.text(&el).await
    }

    async fn cell(&self, row: &A::Element, selector: &str) -> Result<String, AutomationError> {
        let el = self
            .tab
            .find_one(Some(row), selector)
            .await?
            .ok_or_else(|| AutomationError::MissingElement(selector.to_string()))?;
        self.tab.text(&el).await
    }

    async fn optional_cell(&self, row: &A::Element, selector: &str) -> Result<Option<String>, AutomationError> {
        match self.tab.find_one(Some(row), selector).await? {
            Some(el) => Ok(Some(self.tab.text(&el).await?)),
            None => Ok(None),
        }
    }

    /// Open a dialog tab and return its panel.
    async fn open_panel(
        &self,
        dialog: &A::Element,
        tab: &str,
        panel: &str,
    ) -> Result<A::Element, AutomationError> {
        self.click(tab, self.timeouts.detail).await?;
        self.tab.wait_for(Some(dialog), panel, self.timeouts.detail).await
    }

    /// Requisite panels hold an optional table; read it as rows of cells.
    async fn requisite_table(&self, panel: &A::Element) -> Result<Option<Vec<Vec<String>>>, AutomationError> {
        let Some(table) = self.tab.find_one(Some(panel), "table").await? else {
            return Ok(None);
        };
        let mut rows = Vec::new();
        for tr in self.tab.find_all(Some(&table), "tr").await? {
            let mut cells = Vec::new();
            for cell in self.tab.find_all(Some(&tr), "td,th").await? {
                cells.push(self.tab.text(&cell).await?);
            }
            rows.push(cells);
        }
        Ok(Some(rows))
    }
}

#[async_trait]
impl<A: Automation> SearchSession for BannerSession<A> {
    type Row = A::Element;

    async fn open_search(&mut self) -> Result<(), AutomationError> {
        let wait = self.timeouts.navigation;
        self.current_page = None;
        self.tab.navigate(&self.search_url).await?;
        self.click(TERM_PICKER, wait).await?;
        let input = self.tab.wait_for(None, TERM_INPUT, wait).await?;
        self.tab.fill(&input, &self.term).await?;
        self.click(TERM_OPTION, wait).await?;
        self.click(TERM_GO, wait).await?;
        self.click(SEARCH_GO, wait).await?;

        let size = self.page_size.to_string();
        let select = self.tab.wait_for(None, PAGE_SIZE_SELECT, wait).await?;
        self.tab.select_option(&select, &size).await?;
        let confirmed = format!(r#"select[aria-label="{size} per page"]"#);
        self.tab.wait_for(None, &confirmed, wait).await?;
        self.current_page = Some(1);
        debug!(term = %self.term, "On search results");
        Ok(())
    }

    async fn discover(&mut self) -> Result<Discovery, AutomationError> {
        let pages = self.text_of(TOTAL_PAGES).await?;
        let records = self.text_of(RESULT_COUNT).await?;
        let total_pages = parse_leading_int(&pages)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| AutomationError::MissingElement(format!("{TOTAL_PAGES} = {pages:?}")))?;
        let total_records = parse_leading_int(&records)
            .ok_or_else(|| AutomationError::MissingElement(format!("{RESULT_COUNT} = {records:?}")))?;
        Ok(Discovery {
            total_pages,
            total_records,
        })
    }

    /// Submit the page number, then wait for the table to replace the
    /// rows it showed before.
    async fn select_page(&mut self, page: u32) -> Result<(), AutomationError> {
        if self.current_page == Some(page) {
            return Ok(());
        }
        let before = self.first_row_id().await?;
        self.current_page = None;

        let input = self.tab.wait_for(None, PAGE_INPUT, self.timeouts.selector).await?;
        self.tab.fill(&input, &page.to_string()).await?;
        self.tab.press(&input, "Enter").await?;
        if let Some(before) = before {
            self.wait_for_rerender(&before).await?;
        }
        self.current_page = Some(page);
        Ok(())
    }

    async fn rows(&mut self, expected: usize) -> Result<Vec<A::Element>, AutomationError> {
        self.tab
            .wait_for_count(RESULT_ROW, expected, self.timeouts.selector)
            .await
    }

    async fn capture_row(&mut self, row: &A::Element) -> Result<RowCapture, AutomationError> {
        let data_id = self
            .tab
            .attribute(row, "data-id")
            .await?
            .ok_or_else(|| AutomationError::Stale("row lost its data-id".into()))?;

        let mut meeting_times = Vec::new();
        if let Some(td) = self.tab.find_one(Some(row), CELL_MEETINGS).await? {
            for block in self.tab.find_all(Some(&td), MEETING_BLOCK).await? {
                meeting_times.push(meeting_block_text(&self.tab.text(&block).await?));
            }
        }

        Ok(RowCapture {
            data_id,
            title: self.cell(row, CELL_TITLE).await?,
            subject: self.cell(row, CELL_SUBJECT).await?,
            course_number: self.cell(row, CELL_NUMBER).await?,
            section: self.cell(row, CELL_SECTION).await?,
            instructor: self.optional_cell(row, CELL_INSTRUCTOR).await?,
            campus: self.optional_cell(row, CELL_CAMPUS).await?,
            seat_status: self.optional_cell(row, CELL_STATUS).await?,
            meeting_times,
        })
    }

    async fn course_details(&mut self, row: &A::Element) -> Result<DetailsCapture, AutomationError> {
        let link = self.tab.wait_for(Some(row), DETAILS_LINK, self.timeouts.detail).await?;
        self.tab.click(&link).await?;
        let dialog = self.tab.wait_for(None, DETAILS_DIALOG, self.timeouts.detail).await?;

        let panel = self.open_panel(&dialog, CO_REQ_TAB, CO_REQ_PANEL).await?;
        let co_requisites = self.requisite_table(&panel).await?;
        let panel = self.open_panel(&dialog, PRE_REQ_TAB, PRE_REQ_PANEL).await?;
        let prerequisites = self.requisite_table(&panel).await?;
        let panel = self.open_panel(&dialog, CATALOG_TAB, CATALOG_PANEL).await?;
        let catalog_text = self.tab.text(&panel).await?;

        self.click(DIALOG_CLOSE, self.timeouts.detail).await?;
        Ok(DetailsCapture {
            co_requisites,
            prerequisites,
            catalog_text,
        })
    }

    async fn dismiss_overlay(&mut self) -> Result<(), AutomationError> {
        if let Some(button) = self.tab.find_one(None, DIALOG_CLOSE).await? {
            self.tab.click(&button).await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.tab.close().await;
    }
}

/// First integer in an indicator such as `"1,204 results"` or `"25"`.
pub fn parse_leading_int(text: &str) -> Option<u64> {
    LEADING_INT_RE
        .find(text)
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

/// A meeting block renders the day pattern on its first line and the
/// labeled schedule on its last; the lines between repeat the weekday
/// grid and are dropped.
pub fn meeting_block_text(text: &str) -> String {
    match (text.find('\n'), text.rfind('\n')) {
        (Some(first), Some(last)) => format!("{}{}", &text[..first], &text[last..]),
        _ => text.to_string(),
    }
}
