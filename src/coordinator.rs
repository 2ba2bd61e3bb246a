use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::{AutomationError, RunError};
use crate::partition::partition;
use crate::registry::{CourseRegistry, SectionLedger};
use crate::session::{Discovery, SearchSession, SessionFactory};
use crate::sink::Sink;
use crate::store::{Resume, Store};
use crate::worker::{PageWorker, RetryLimits, WorkerContext, WorkerReport};

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub workers: usize,
    pub page_size: u32,
    pub limits: RetryLimits,
    pub flush_interval: Duration,
    pub show_progress: bool,
}

/// What a finished run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_pages: u32,
    pub total_records: u64,
    pub workers_launched: usize,
    pub workers_completed: usize,
    /// Pages that exhausted their retries, ascending. Re-run these.
    pub failed_pages: Vec<u32>,
    pub courses: usize,
    pub sections: usize,
    pub skipped_rows: usize,
    pub malformed_rows: usize,
    pub failed_rows: usize,
}

impl RunSummary {
    fn absorb(&mut self, report: WorkerReport) {
        self.workers_completed += 1;
        self.failed_pages.extend(report.failed_pages);
        self.courses += report.courses;
        self.sections += report.sections;
        self.skipped_rows += report.skipped_rows;
        self.malformed_rows += report.malformed_rows;
        self.failed_rows += report.failed_rows;
    }
}

/// Read the page and record counts with a throwaway session.
pub async fn discover<F: SessionFactory>(factory: &F) -> Result<Discovery, AutomationError> {
    let mut session = factory.open().await?;
    let result = match session.open_search().await {
        Ok(()) => session.discover().await,
        Err(e) => Err(e),
    };
    session.close().await;
    result
}

fn progress_bar(total: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Scrape one term end to end: discover, split the pages, run the workers
/// against a shared sink, then flush whatever is left.
///
/// Individual page, row, and worker failures are reported in the summary.
/// Only discovery, the final flush, or losing every worker fail the run.
pub async fn run<F: SessionFactory>(
    factory: Arc<F>,
    store: Store,
    resume: Resume,
    settings: &RunSettings,
) -> Result<RunSummary, RunError> {
    let discovery = discover(factory.as_ref()).await.map_err(RunError::Discovery)?;
    info!(
        pages = discovery.total_pages,
        records = discovery.total_records,
        "Discovered result set"
    );

    let ranges = partition(discovery.total_pages, settings.workers);
    let registry = Arc::new(CourseRegistry::seeded(resume.courses));
    let ledger = Arc::new(SectionLedger::seeded(resume.section_ids));
    let progress = progress_bar(discovery.total_records, settings.show_progress);
    let sink = Arc::new(Sink::new(store, progress.clone()));

    let (stop_flush, stop_rx) = oneshot::channel();
    let flusher = {
        let sink = Arc::clone(&sink);
        let every = settings.flush_interval;
        tokio::spawn(async move { sink.run_flush_loop(every, stop_rx).await })
    };

    let ctx = Arc::new(WorkerContext {
        registry: Arc::clone(&registry),
        ledger,
        sink: Arc::clone(&sink),
        limits: settings.limits,
        discovery,
        page_size: settings.page_size,
    });

    let mut workers = Vec::with_capacity(ranges.len());
    for (index, pages) in ranges.into_iter().enumerate() {
        let factory = Arc::clone(&factory);
        let ctx = Arc::clone(&ctx);
        let range = pages.clone();
        let handle = tokio::spawn(async move {
            let session = factory.open().await?;
            Ok::<_, AutomationError>(PageWorker::new(index, session, pages, ctx).run().await)
        });
        workers.push((index, range, handle));
    }

    let mut summary = RunSummary {
        total_pages: discovery.total_pages,
        total_records: discovery.total_records,
        workers_launched: workers.len(),
        ..RunSummary::default()
    };

    for (index, range, handle) in workers {
        match handle.await {
            Ok(Ok(report)) => summary.absorb(report),
            Ok(Err(e)) => {
                warn!(worker = index, "Could not open a session: {}", e);
                summary.failed_pages.extend(range);
            }
            Err(e) => {
                warn!(worker = index, "Worker aborted: {}", e);
                summary.failed_pages.extend(range);
            }
        }
    }

    // The loop may be mid-flush; wait for it before the last one.
    let _ = stop_flush.send(());
    if let Err(e) = flusher.await {
        warn!("Flush loop aborted: {}", e);
    }
    let last = Arc::clone(&sink).flush_blocking().await;
    progress.finish_and_clear();
    last?;

    summary.failed_pages.sort_unstable();
    summary.failed_pages.dedup();
    let flushed = sink.flushed();
    info!(
        courses = flushed.courses,
        sections = flushed.sections,
        registered = registry.len(),
        failed_pages = summary.failed_pages.len(),
        "Run finished"
    );

    if summary.workers_launched > 0 && summary.workers_completed == 0 {
        return Err(RunError::NoWorkerCompleted(summary.workers_launched));
    }
    Ok(summary)
}
