use std::ops::RangeInclusive;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{AutomationError, RowError};
use crate::record::{self, Built, Course};
use crate::registry::{CourseRegistry, SectionLedger, Seen};
use crate::session::{Discovery, SearchSession};
use crate::sink::{Record, Sink};

/// Attempt budgets. Each counts total attempts, not retries after the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    pub page_attempts: u32,
    pub row_attempts: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            page_attempts: 5,
            row_attempts: 3,
        }
    }
}

/// State shared by every worker in a run.
pub struct WorkerContext {
    pub registry: Arc<CourseRegistry>,
    pub ledger: Arc<SectionLedger>,
    pub sink: Arc<Sink>,
    pub limits: RetryLimits,
    pub discovery: Discovery,
    pub page_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub failed_pages: Vec<u32>,
    pub courses: usize,
    pub sections: usize,
    /// Rows whose identifier was already persisted or emitted.
    pub skipped_rows: usize,
    pub malformed_rows: usize,
    pub failed_rows: usize,
}

/// Where a worker is within the current page.
#[derive(Debug)]
enum PageState {
    Navigating,
    Selecting,
    Extracting,
    Recovering(AutomationError),
}

enum PageOutcome {
    Completed,
    Failed,
    /// The session cannot be used again.
    Lost,
}

enum RowOutcome {
    Emitted,
    AlreadySeen(Seen),
    Dropped,
}

/// Walks one contiguous page range with its own session.
pub struct PageWorker<S: SearchSession> {
    index: usize,
    session: S,
    pages: RangeInclusive<u32>,
    ctx: Arc<WorkerContext>,
    report: WorkerReport,
    on_results: bool,
}

impl<S: SearchSession> PageWorker<S> {
    pub fn new(index: usize, session: S, pages: RangeInclusive<u32>, ctx: Arc<WorkerContext>) -> Self {
        Self {
            index,
            session,
            pages,
            ctx,
            report: WorkerReport {
                worker: index,
                ..WorkerReport::default()
            },
            on_results: false,
        }
    }

    /// Visit every page in the range, then release the session.
    pub async fn run(mut self) -> WorkerReport {
        info!(worker = self.index, pages = ?self.pages, "Worker starting");
        let mut pages = self.pages.clone();
        while let Some(page) = pages.next() {
            match self.visit_page(page).await {
                PageOutcome::Completed => {}
                PageOutcome::Failed => self.report.failed_pages.push(page),
                PageOutcome::Lost => {
                    self.report.failed_pages.push(page);
                    self.report.failed_pages.extend(pages.by_ref());
                    break;
                }
            }
        }
        self.session.close().await;
        info!(
            worker = self.index,
            sections = self.report.sections,
            courses = self.report.courses,
            failed_pages = ?self.report.failed_pages,
            "Worker done"
        );
        self.report
    }

    async fn visit_page(&mut self, page: u32) -> PageOutcome {
        let mut attempt = 1;
        let mut state = if self.on_results {
            PageState::Selecting
        } else {
            PageState::Navigating
        };

        loop {
            state = match state {
                PageState::Navigating => match self.session.open_search().await {
                    Ok(()) => {
                        self.on_results = true;
                        PageState::Selecting
                    }
                    Err(e) => PageState::Recovering(e),
                },
                PageState::Selecting => match self.session.select_page(page).await {
                    Ok(()) => PageState::Extracting,
                    Err(e) => PageState::Recovering(e),
                },
                PageState::Extracting => match self.extract_rows(page).await {
                    Ok(()) => return PageOutcome::Completed,
                    Err(e) => PageState::Recovering(e),
                },
                PageState::Recovering(e) => {
                    self.on_results = false;
                    if !e.is_transient() {
                        warn!(worker = self.index, page, "Session lost: {}", e);
                        return PageOutcome::Lost;
                    }
                    if attempt >= self.ctx.limits.page_attempts {
                        warn!(worker = self.index, page, attempt, "Giving up on page: {}", e);
                        return PageOutcome::Failed;
                    }
                    warn!(worker = self.index, page, attempt, "Page failed, renavigating: {}", e);
                    attempt += 1;
                    PageState::Navigating
                }
            };
        }
    }

    async fn extract_rows(&mut self, page: u32) -> Result<(), AutomationError> {
        let expected = self
            .ctx
            .discovery
            .expected_rows(page, self.ctx.page_size);
        let rows = self.session.rows(expected).await?;
        debug!(worker = self.index, page, rows = rows.len(), "Extracting rows");

        let mut persisted = 0;
        let mut emitted_earlier = 0;
        for row in &rows {
            match self.process_row(row).await? {
                RowOutcome::AlreadySeen(Seen::Persisted) => persisted += 1,
                RowOutcome::AlreadySeen(Seen::Emitted) => emitted_earlier += 1,
                RowOutcome::Emitted | RowOutcome::Dropped => {}
            }
        }

        // Every row came from an earlier page: the table still shows what
        // was there before the page switch.
        if !rows.is_empty() && emitted_earlier == rows.len() {
            return Err(AutomationError::Stale(format!(
                "page {page} still shows rows extracted earlier in this run"
            )));
        }
        self.report.skipped_rows += persisted + emitted_earlier;
        Ok(())
    }

    /// Build and emit one row, retrying transient failures. Only an
    /// unusable session escapes as an error.
    async fn process_row(&mut self, row: &S::Row) -> Result<RowOutcome, AutomationError> {
        // A course registered by an earlier attempt of this row, still
        // waiting for its metadata.
        let mut pending: Option<Course> = None;
        let mut attempt = 1;

        let result = loop {
            match self.try_row(row, &mut pending).await {
                Ok(outcome) => break Ok(outcome),
                Err(RowError::Malformed(e)) => {
                    warn!(worker = self.index, "Dropping malformed row: {}", e);
                    self.report.malformed_rows += 1;
                    break Ok(RowOutcome::Dropped);
                }
                Err(RowError::Automation(e)) if !e.is_transient() => break Err(e),
                Err(RowError::Automation(e)) => {
                    if attempt >= self.ctx.limits.row_attempts {
                        warn!(worker = self.index, attempt, "Giving up on row: {}", e);
                        self.report.failed_rows += 1;
                        break Ok(RowOutcome::Dropped);
                    }
                    debug!(worker = self.index, attempt, "Row failed, retrying: {}", e);
                    attempt += 1;
                    if let Err(e) = self.session.dismiss_overlay().await {
                        if !e.is_transient() {
                            break Err(e);
                        }
                    }
                }
            }
        };

        // The id is already taken, so the course is written even without
        // its metadata rather than leaving sections pointing nowhere.
        if let Some(course) = pending.take() {
            warn!(worker = self.index, subject = %course.subject, number = %course.number, "Emitting course without details");
            self.emit_course(course);
        }
        result
    }

    async fn try_row(&mut self, row: &S::Row, pending: &mut Option<Course>) -> Result<RowOutcome, RowError> {
        let capture = self.session.capture_row(row).await?;
        let data_id = record::parse_data_id(&capture.data_id)?;
        if let Some(seen) = self.ctx.ledger.status(data_id) {
            return Ok(RowOutcome::AlreadySeen(seen));
        }

        let section = match record::build(&capture, &self.ctx.registry)? {
            Built::Known(section) => section,
            Built::New { course, section } => {
                *pending = Some(course);
                section
            }
        };

        if let Some(course) = pending.as_mut().filter(|c| c.id == section.course_id) {
            let details = self.session.course_details(row).await?;
            course.enrich(details);
        }
        if let Some(course) = pending.take() {
            self.emit_course(course);
        }

        if self.ctx.ledger.record(section.data_id) {
            self.ctx.sink.submit(Record::Section(section));
            self.report.sections += 1;
        }
        Ok(RowOutcome::Emitted)
    }

    fn emit_course(&mut self, course: Course) {
        self.ctx.sink.submit(Record::Course(course));
        self.report.courses += 1;
    }
}
