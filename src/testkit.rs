//! In-memory stand-ins for the search site, used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AutomationError;
use crate::record::{Course, DetailsCapture, MeetingTime, RowCapture, Section};
use crate::session::{Discovery, SearchSession, SessionFactory};

pub fn course(id: u32, subject: &str, number: &str) -> Course {
    Course {
        id,
        title: format!("{subject} {number}, \"quoted\""),
        taught_how: "Online".into(),
        subject: subject.into(),
        number: number.into(),
        co_requisites: None,
        prerequisites: Some(vec![vec!["And/Or".into(), "MATH 115".into()]]),
        college: Some("Science".into()),
        department: None,
        credit_hours: Some("3".into()),
    }
}

pub fn section(data_id: u64, course_id: u32) -> Section {
    Section {
        data_id,
        section: "201".into(),
        instructor: None,
        meeting_times: vec![MeetingTime {
            days: "TR".into(),
            start_time: "9:30 am".into(),
            end_time: "10:45 am".into(),
            meeting_type: "Lecture".into(),
            building: "Hancock".into(),
            room: "1021".into(),
            start_date: "01/17/24".into(),
            end_date: "05/10/24".into(),
        }],
        campus: Some("Main Campus".into()),
        seat_cap: Some(24),
        course_id,
    }
}

#[derive(Debug, Default)]
struct Faults {
    everything: bool,
    discover: bool,
    opens: HashSet<usize>,
    select: HashMap<u32, u32>,
    close_on_select: HashSet<u32>,
    lag: HashMap<u32, u32>,
    capture: HashMap<String, u32>,
    details: HashMap<String, u32>,
}

/// Counts of calls made against a [`FakeSite`].
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub opens: usize,
    pub open_search: usize,
    pub details: usize,
    pub dismissed: usize,
    pub closed: usize,
    captures: HashMap<String, usize>,
}

impl Calls {
    pub fn captures_of(&self, data_id: &str) -> usize {
        self.captures.get(data_id).copied().unwrap_or(0)
    }
}

/// A paginated result set with scriptable failures.
#[derive(Debug)]
pub struct FakeSite {
    pub page_size: u32,
    pages: Mutex<Vec<Vec<RowCapture>>>,
    faults: Mutex<Faults>,
    calls: Mutex<Calls>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

/// Consume one scripted failure for `key`, if any remain.
fn take<K: std::hash::Hash + Eq>(faults: &mut HashMap<K, u32>, key: &K) -> bool {
    match faults.get_mut(key) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

impl FakeSite {
    /// `records` rows with ids starting at 1000, spread over `courses`
    /// course numbers in round-robin order.
    pub fn generate(records: usize, page_size: u32, courses: usize) -> Self {
        let rows: Vec<RowCapture> = (0..records)
            .map(|i| {
                let course = i % courses;
                RowCapture {
                    data_id: (1000 + i).to_string(),
                    title: format!("Course {course}\nIn Person"),
                    subject: "CMPT".into(),
                    course_number: (100 + course).to_string(),
                    section: format!("{:03}", i),
                    instructor: Some("Staff".into()),
                    campus: Some("Main".into()),
                    seat_status: Some("Cap: 30 Act: 10 Rem: 20".into()),
                    meeting_times: vec![
                        "MWF\n10:00 am - 10:50 am Type:Lecture Building:ABC Room:101 Start Date:01/01/24 End Date:05/01/24"
                            .into(),
                    ],
                }
            })
            .collect();
        let pages = rows.chunks(page_size as usize).map(<[RowCapture]>::to_vec).collect();
        Self {
            page_size,
            pages: Mutex::new(pages),
            faults: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    pub fn discovery(&self) -> Discovery {
        let pages = lock(&self.pages);
        Discovery {
            total_pages: pages.len() as u32,
            total_records: pages.iter().map(|p| p.len() as u64).sum(),
        }
    }

    pub fn calls(&self) -> Calls {
        lock(&self.calls).clone()
    }

    pub fn edit_row(&self, data_id: &str, edit: impl FnOnce(&mut RowCapture)) {
        let mut pages = lock(&self.pages);
        if let Some(row) = pages.iter_mut().flatten().find(|r| r.data_id == data_id) {
            edit(row);
        }
    }

    pub fn fail_everything(&self) {
        lock(&self.faults).everything = true;
    }

    pub fn fail_discovery(&self) {
        lock(&self.faults).discover = true;
    }

    /// Fail the `nth` session open (1-based, counting the discovery session).
    pub fn fail_open(&self, nth: usize) {
        lock(&self.faults).opens.insert(nth);
    }

    pub fn fail_select(&self, page: u32, times: u32) {
        lock(&self.faults).select.insert(page, times);
    }

    /// After selecting `page`, the next `times` row reads still show the
    /// page that was on screen before.
    pub fn lag_render(&self, page: u32, times: u32) {
        lock(&self.faults).lag.insert(page, times);
    }

    pub fn close_on_select(&self, page: u32) {
        lock(&self.faults).close_on_select.insert(page);
    }

    pub fn fail_capture(&self, data_id: &str, times: u32) {
        lock(&self.faults).capture.insert(data_id.to_string(), times);
    }

    pub fn fail_details(&self, data_id: &str, times: u32) {
        lock(&self.faults).details.insert(data_id.to_string(), times);
    }

    fn row(&self, data_id: &str) -> Option<RowCapture> {
        lock(&self.pages)
            .iter()
            .flatten()
            .find(|r| r.data_id == data_id)
            .cloned()
    }
}

fn scripted(what: &str) -> AutomationError {
    AutomationError::Navigation(format!("scripted failure: {what}"))
}

/// A session over a [`FakeSite`]. Rows are identified by their data id.
pub struct ScriptedSession {
    site: Arc<FakeSite>,
    page: Option<u32>,
    /// Page still rendered while the selected one loads.
    stale: Option<u32>,
}

impl ScriptedSession {
    pub fn new(site: Arc<FakeSite>) -> Self {
        Self {
            site,
            page: None,
            stale: None,
        }
    }
}

#[async_trait]
impl SearchSession for ScriptedSession {
    type Row = String;

    async fn open_search(&mut self) -> Result<(), AutomationError> {
        lock(&self.site.calls).open_search += 1;
        self.page = None;
        self.stale = None;
        if lock(&self.site.faults).everything {
            return Err(scripted("open_search"));
        }
        self.page = Some(1);
        Ok(())
    }

    async fn discover(&mut self) -> Result<Discovery, AutomationError> {
        let faults = lock(&self.site.faults);
        if faults.everything || faults.discover {
            return Err(AutomationError::Timeout {
                selector: "span.total-pages".into(),
                waited: Duration::from_millis(10),
            });
        }
        drop(faults);
        Ok(self.site.discovery())
    }

    async fn select_page(&mut self, page: u32) -> Result<(), AutomationError> {
        let mut faults = lock(&self.site.faults);
        if faults.close_on_select.contains(&page) {
            return Err(AutomationError::SessionClosed);
        }
        if faults.everything || take(&mut faults.select, &page) {
            return Err(scripted("select_page"));
        }
        let Some(previous) = self.page else {
            return Err(AutomationError::Stale("not on the results page".into()));
        };
        self.stale = (previous != page && take(&mut faults.lag, &page)).then_some(previous);
        self.page = Some(page);
        Ok(())
    }

    async fn rows(&mut self, expected: usize) -> Result<Vec<String>, AutomationError> {
        let page = self
            .stale
            .take()
            .or(self.page)
            .ok_or_else(|| AutomationError::Stale("not on the results page".into()))?;
        let pages = lock(&self.site.pages);
        let ids: Vec<String> = pages
            .get(page as usize - 1)
            .map(|rows| rows.iter().map(|r| r.data_id.clone()).collect())
            .unwrap_or_default();
        if ids.len() != expected {
            return Err(AutomationError::Timeout {
                selector: format!("tr[data-id] (x{expected}, saw {})", ids.len()),
                waited: Duration::from_millis(10),
            });
        }
        Ok(ids)
    }

    async fn capture_row(&mut self, row: &String) -> Result<RowCapture, AutomationError> {
        *lock(&self.site.calls).captures.entry(row.clone()).or_default() += 1;
        let mut faults = lock(&self.site.faults);
        if faults.everything || take(&mut faults.capture, row) {
            return Err(AutomationError::Stale(format!("row {row}")));
        }
        drop(faults);
        self.site
            .row(row)
            .ok_or_else(|| AutomationError::MissingElement(format!("tr[data-id=\"{row}\"]")))
    }

    async fn course_details(&mut self, row: &String) -> Result<DetailsCapture, AutomationError> {
        lock(&self.site.calls).details += 1;
        let mut faults = lock(&self.site.faults);
        if faults.everything || take(&mut faults.details, row) {
            return Err(AutomationError::Timeout {
                selector: "div#classDetailsContentDetailsDiv".into(),
                waited: Duration::from_millis(10),
            });
        }
        Ok(DetailsCapture {
            co_requisites: None,
            prerequisites: Some(vec![vec!["Course".into(), "CMPT 100".into()]]),
            catalog_text: "College: Computer Science & Math\nDepartment: Computing\nCredit Hours: 4".into(),
        })
    }

    async fn dismiss_overlay(&mut self) -> Result<(), AutomationError> {
        lock(&self.site.calls).dismissed += 1;
        Ok(())
    }

    async fn close(&mut self) {
        lock(&self.site.calls).closed += 1;
    }
}

pub struct FakeFactory {
    pub site: Arc<FakeSite>,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = ScriptedSession;

    async fn open(&self) -> Result<ScriptedSession, AutomationError> {
        let nth = {
            let mut calls = lock(&self.site.calls);
            calls.opens += 1;
            calls.opens
        };
        if lock(&self.site.faults).opens.contains(&nth) {
            return Err(AutomationError::Backend(format!("scripted: open #{nth} refused")));
        }
        Ok(ScriptedSession::new(Arc::clone(&self.site)))
    }
}
