use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use indicatif::ProgressBar;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::record::{Course, Section};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Course(Course),
    Section(Section),
}

/// Records waiting for the next flush, in arrival order per table.
#[derive(Debug, Default)]
pub struct Batch {
    pub courses: Vec<Course>,
    pub sections: Vec<Section>,
}

impl Batch {
    pub fn push(&mut self, record: Record) {
        match record {
            Record::Course(c) => self.courses.push(c),
            Record::Section(s) => self.sections.push(s),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.courses.len() + self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty() && self.sections.is_empty()
    }

    /// Append `later` after the records already here.
    fn extend(&mut self, later: Batch) {
        self.courses.extend(later.courses);
        self.sections.extend(later.sections);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub courses: usize,
    pub sections: usize,
}

/// Shared buffer between workers and the table files.
///
/// Workers `submit`; a background loop swaps the buffer out on a fixed
/// interval and appends it to the store. A batch that fails to write goes
/// back to the front of the buffer for the next attempt.
pub struct Sink {
    pending: Mutex<Batch>,
    store: Mutex<Store>,
    progress: ProgressBar,
    flushed_courses: AtomicUsize,
    flushed_sections: AtomicUsize,
}

impl Sink {
    pub fn new(store: Store, progress: ProgressBar) -> Self {
        Self {
            pending: Mutex::new(Batch::default()),
            store: Mutex::new(store),
            progress,
            flushed_courses: AtomicUsize::new(0),
            flushed_sections: AtomicUsize::new(0),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Batch> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn submit(&self, record: Record) {
        let is_section = matches!(record, Record::Section(_));
        self.pending().push(record);
        if is_section {
            self.progress.inc(1);
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    /// Write everything submitted so far. Blocks on file I/O.
    pub fn flush(&self) -> Result<FlushStats> {
        // Holding the store lock across the swap keeps batches in order
        // when the loop and a caller flush at the same time.
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch = mem::take(&mut *self.pending());
        if batch.is_empty() {
            return Ok(FlushStats::default());
        }

        if let Err(e) = store.append_courses(&batch.courses) {
            self.requeue(batch);
            return Err(e);
        }
        let courses = mem::take(&mut batch.courses).len();
        self.flushed_courses.fetch_add(courses, Ordering::Relaxed);

        // Courses are on disk now; only the sections go back on failure.
        if let Err(e) = store.append_sections(&batch.sections) {
            self.requeue(batch);
            return Err(e);
        }
        let stats = FlushStats {
            courses,
            sections: batch.sections.len(),
        };
        self.flushed_sections.fetch_add(stats.sections, Ordering::Relaxed);
        debug!(courses = stats.courses, sections = stats.sections, "Flushed batch");
        Ok(stats)
    }

    /// Put an unwritten batch back ahead of anything submitted since.
    fn requeue(&self, batch: Batch) {
        let mut pending = self.pending();
        let newer = mem::replace(&mut *pending, batch);
        pending.extend(newer);
    }

    /// [`Sink::flush`] on the blocking pool.
    pub async fn flush_blocking(self: Arc<Self>) -> Result<FlushStats> {
        tokio::task::spawn_blocking(move || self.flush())
            .await
            .map_err(|e| anyhow!("Flush task aborted: {}", e))?
    }

    /// Totals written to the store over the sink's lifetime.
    pub fn flushed(&self) -> FlushStats {
        FlushStats {
            courses: self.flushed_courses.load(Ordering::Relaxed),
            sections: self.flushed_sections.load(Ordering::Relaxed),
        }
    }

    /// Flush every `every` until `stop` fires or its sender is dropped.
    /// Write errors are logged and retried on the next tick.
    pub async fn run_flush_loop(self: Arc<Self>, every: Duration, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = Arc::clone(&self).flush_blocking().await {
                        warn!("Periodic flush failed, will retry: {:#}", e);
                    }
                }
                _ = &mut stop => break,
            }
        }
    }
}
