use serde::Serialize;

use crate::error::MalformedRow;
use crate::registry::{CourseRegistry, Registration};

/// Fixed weekday mask the search results print when a meeting has no
/// line break after its day pattern.
const WEEKDAY_MASK: &str = "SMTWTFS";

/// Catalog text after this marker lists levels and schedule types, which
/// repeat some of the labels below.
const CATALOG_CUTOFF: &str = "Levels: ";

const CATALOG_LABELS: [&str; 3] = ["College:", "Department:", "Credit Hours:"];

/// Field strings pulled out of one result row.
#[derive(Debug, Clone, Default)]
pub struct RowCapture {
    pub data_id: String,
    pub title: String,
    pub subject: String,
    pub course_number: String,
    pub section: String,
    pub instructor: Option<String>,
    pub campus: Option<String>,
    pub seat_status: Option<String>,
    pub meeting_times: Vec<String>,
}

/// Raw output of the course detail dialog.
#[derive(Debug, Clone, Default)]
pub struct DetailsCapture {
    pub co_requisites: Option<Vec<Vec<String>>>,
    pub prerequisites: Option<Vec<Vec<String>>>,
    pub catalog_text: String,
}

/// Natural key of a course: subject code plus course number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CourseKey {
    pub subject: String,
    pub number: String,
}

impl CourseKey {
    pub fn new(subject: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            number: number.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub id: u32,
    pub title: String,
    pub taught_how: String,
    pub subject: String,
    pub number: String,
    pub co_requisites: Option<Vec<Vec<String>>>,
    pub prerequisites: Option<Vec<Vec<String>>>,
    pub college: Option<String>,
    pub department: Option<String>,
    pub credit_hours: Option<String>,
}

impl Course {
    /// Fill the descriptive metadata from the detail dialog.
    pub fn enrich(&mut self, details: DetailsCapture) {
        let catalog = parse_catalog(&details.catalog_text);
        self.co_requisites = details.co_requisites;
        self.prerequisites = details.prerequisites;
        self.college = catalog.college;
        self.department = catalog.department;
        self.credit_hours = catalog.credit_hours;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeetingTime {
    pub days: String,
    pub start_time: String,
    pub end_time: String,
    pub meeting_type: String,
    pub building: String,
    pub room: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub data_id: u64,
    pub section: String,
    pub instructor: Option<String>,
    pub meeting_times: Vec<MeetingTime>,
    pub campus: Option<String>,
    pub seat_cap: Option<i64>,
    pub course_id: u32,
}

/// Result of building one row against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Built {
    /// The course was already registered.
    Known(Section),
    /// This row registered the course; the caller owns its metadata.
    New { course: Course, section: Section },
}

/// A row whose text has been validated but not yet tied to a course id.
#[derive(Debug, Clone)]
struct ParsedRow {
    key: CourseKey,
    title: String,
    taught_how: String,
    data_id: u64,
    section: String,
    instructor: Option<String>,
    campus: Option<String>,
    seat_cap: Option<i64>,
    meeting_times: Vec<MeetingTime>,
}

impl ParsedRow {
    fn parse(capture: &RowCapture) -> Result<Self, MalformedRow> {
        let data_id = parse_data_id(&capture.data_id)?;
        let subject = capture.subject.trim();
        let number = capture.course_number.trim();
        if subject.is_empty() || number.is_empty() {
            return Err(MalformedRow::CourseKey);
        }
        let (title, taught_how) = split_title(&capture.title)?;
        let meeting_times = capture
            .meeting_times
            .iter()
            .map(|raw| parse_meeting_time(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            key: CourseKey::new(subject, number),
            title,
            taught_how,
            data_id,
            section: capture.section.trim().to_string(),
            instructor: non_empty(capture.instructor.as_deref()),
            campus: non_empty(capture.campus.as_deref()),
            seat_cap: capture.seat_status.as_deref().and_then(seat_capacity),
            meeting_times,
        })
    }

    fn new_course(&self, id: u32) -> Course {
        Course {
            id,
            title: self.title.clone(),
            taught_how: self.taught_how.clone(),
            subject: self.key.subject.clone(),
            number: self.key.number.clone(),
            co_requisites: None,
            prerequisites: None,
            college: None,
            department: None,
            credit_hours: None,
        }
    }

    fn into_section(self, course_id: u32) -> Section {
        Section {
            data_id: self.data_id,
            section: self.section,
            instructor: self.instructor,
            meeting_times: self.meeting_times,
            campus: self.campus,
            seat_cap: self.seat_cap,
            course_id,
        }
    }
}

/// Validate a captured row and resolve its course, registering the course
/// if this is the first time any worker has seen it.
///
/// Parsing happens before registration so a malformed row never consumes
/// a course id.
pub fn build(capture: &RowCapture, registry: &CourseRegistry) -> Result<Built, MalformedRow> {
    let parsed = ParsedRow::parse(capture)?;
    let built = match registry.create(parsed.key.clone()) {
        Registration::Existing(id) => Built::Known(parsed.into_section(id)),
        Registration::Created(id) => {
            let course = parsed.new_course(id);
            Built::New {
                course,
                section: parsed.into_section(id),
            }
        }
    };
    Ok(built)
}

pub fn parse_data_id(raw: &str) -> Result<u64, MalformedRow> {
    raw.trim()
        .parse()
        .map_err(|_| MalformedRow::DataId(raw.to_string()))
}

/// Split the two-line title cell into (title, instructional mode).
pub fn split_title(raw: &str) -> Result<(String, String), MalformedRow> {
    let cleaned = raw.replace('"', "");
    let lines: Vec<&str> = cleaned.trim_end_matches('\n').split('\n').collect();
    match lines.as_slice() {
        [title, mode] => Ok((title.trim().to_string(), mode.trim().to_string())),
        _ => Err(MalformedRow::TitleLines { found: lines.len() }),
    }
}

/// Parse one meeting block, e.g.
/// `MWF\n10:00 am - 10:50 am Type:Lecture Building:ABC Room:101 Start Date:01/01/24 End Date:05/01/24`.
pub fn parse_meeting_time(raw: &str) -> Result<MeetingTime, MalformedRow> {
    let (days, rest) = raw
        .split_once('\n')
        .or_else(|| raw.split_once(WEEKDAY_MASK))
        .ok_or_else(|| MalformedRow::MeetingLabel {
            label: "day pattern",
            raw: raw.to_string(),
        })?;

    let take = |rest: &str, label: &'static str| -> Result<(String, String), MalformedRow> {
        rest.split_once(label)
            .map(|(before, after)| (before.to_string(), after.to_string()))
            .ok_or_else(|| MalformedRow::MeetingLabel {
                label,
                raw: raw.to_string(),
            })
    };

    let (range, rest) = take(rest, "Type:")?;
    let (start_time, end_time) = range
        .split_once(" - ")
        .ok_or_else(|| MalformedRow::MeetingRange(raw.to_string()))?;
    let (meeting_type, rest) = take(rest.as_str(), "Building:")?;
    let (building, rest) = take(rest.as_str(), "Room:")?;
    let (room, rest) = take(rest.as_str(), "Start Date:")?;
    let (start_date, end_date) = take(rest.as_str(), "End Date:")?;

    Ok(MeetingTime {
        days: days.trim().to_string(),
        start_time: start_time.trim().to_string(),
        end_time: end_time.trim().to_string(),
        meeting_type: meeting_type.replace('\u{a0}', "").trim().to_string(),
        building: building.trim().to_string(),
        room: room.trim().to_string(),
        start_date: start_date.trim().to_string(),
        end_date: end_date.trim().to_string(),
    })
}

/// Seat capacity from a status line such as `Cap: 30 Act: 28 Rem: 2`.
///
/// Heuristic: the status text does not label its counts reliably, so the
/// largest integer token is taken as the capacity. Remaining seats can go
/// negative and actual enrollment can exceed capacity on overfilled
/// sections, in which case this reports the enrollment instead.
pub fn seat_capacity(status: &str) -> Option<i64> {
    status
        .split_whitespace()
        .filter_map(|token| token.parse::<i64>().ok())
        .max()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogInfo {
    pub college: Option<String>,
    pub department: Option<String>,
    pub credit_hours: Option<String>,
}

/// Pull the labeled catalog fields out of the catalog tab text. Each label
/// fills its own slot; the first occurrence wins.
pub fn parse_catalog(text: &str) -> CatalogInfo {
    let text = match text.find(CATALOG_CUTOFF) {
        Some(cut) => &text[..cut],
        None => text,
    };

    let mut slots: [Option<String>; 3] = Default::default();
    for line in text.lines() {
        for (slot, label) in slots.iter_mut().zip(CATALOG_LABELS) {
            if slot.is_none() {
                if let Some(value) = line.strip_prefix(label) {
                    *slot = Some(value.trim().to_string());
                }
            }
        }
        if slots.iter().all(Option::is_some) {
            break;
        }
    }

    let [college, department, credit_hours] = slots;
    CatalogInfo {
        college,
        department,
        credit_hours,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
