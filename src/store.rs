use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::record::{Course, CourseKey, Section};

pub const COURSES_FILE: &str = "courses.csv";
pub const SECTIONS_FILE: &str = "sections.csv";

pub const COURSE_HEADER: [&str; 10] = [
    "course_title",
    "taught_how",
    "subject",
    "number",
    "co_requisites",
    "prerequisites",
    "college",
    "department",
    "credit_hours",
    "id",
];

pub const SECTION_HEADER: [&str; 7] = [
    "section",
    "instructor",
    "meeting_times",
    "campus",
    "seat_cap",
    "data_id",
    "course_id",
];

/// What a previous run left on disk.
#[derive(Debug, Default)]
pub struct Resume {
    pub courses: Vec<(CourseKey, u32)>,
    pub section_ids: Vec<u64>,
}

/// Append-only course and section tables for one term.
#[derive(Debug, Clone)]
pub struct Store {
    courses_path: PathBuf,
    sections_path: PathBuf,
}

#[derive(Serialize)]
struct CourseRow<'a> {
    course_title: &'a str,
    taught_how: &'a str,
    subject: &'a str,
    number: &'a str,
    co_requisites: Option<String>,
    prerequisites: Option<String>,
    college: Option<&'a str>,
    department: Option<&'a str>,
    credit_hours: Option<&'a str>,
    id: u32,
}

#[derive(Serialize)]
struct SectionRow<'a> {
    section: &'a str,
    instructor: Option<&'a str>,
    meeting_times: String,
    campus: Option<&'a str>,
    seat_cap: Option<i64>,
    data_id: u64,
    course_id: u32,
}

#[derive(Deserialize)]
struct CourseKeyRow {
    subject: String,
    number: String,
    id: u32,
}

#[derive(Deserialize)]
struct SectionIdRow {
    data_id: u64,
}

impl Store {
    /// Open the tables under `dir`, creating header-only files where none
    /// exist, and read back what is already there.
    pub fn open(dir: &Path) -> Result<(Self, Resume)> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        let store = Self {
            courses_path: dir.join(COURSES_FILE),
            sections_path: dir.join(SECTIONS_FILE),
        };

        let mut resume = Resume::default();
        if has_content(&store.courses_path) {
            resume.courses = read_course_keys(&store.courses_path)?;
        } else {
            write_header(&store.courses_path, &COURSE_HEADER)?;
        }
        if has_content(&store.sections_path) {
            resume.section_ids = read_section_ids(&store.sections_path)?;
        } else {
            write_header(&store.sections_path, &SECTION_HEADER)?;
        }

        if !resume.courses.is_empty() || !resume.section_ids.is_empty() {
            info!(
                courses = resume.courses.len(),
                sections = resume.section_ids.len(),
                "Resuming from {:?}",
                dir
            );
        }
        Ok((store, resume))
    }

    pub fn courses_path(&self) -> &Path {
        &self.courses_path
    }

    pub fn sections_path(&self) -> &Path {
        &self.sections_path
    }

    /// Append course rows, keeping their order.
    pub fn append_courses(&self, courses: &[Course]) -> Result<()> {
        if courses.is_empty() {
            return Ok(());
        }
        let mut w = appender(&self.courses_path)?;
        for c in courses {
            w.serialize(CourseRow {
                course_title: &c.title,
                taught_how: &c.taught_how,
                subject: &c.subject,
                number: &c.number,
                co_requisites: c.co_requisites.as_ref().map(to_json).transpose()?,
                prerequisites: c.prerequisites.as_ref().map(to_json).transpose()?,
                college: c.college.as_deref(),
                department: c.department.as_deref(),
                credit_hours: c.credit_hours.as_deref(),
                id: c.id,
            })?;
        }
        w.flush()?;
        Ok(())
    }

    /// Append section rows, keeping their order.
    pub fn append_sections(&self, sections: &[Section]) -> Result<()> {
        if sections.is_empty() {
            return Ok(());
        }
        let mut w = appender(&self.sections_path)?;
        for s in sections {
            w.serialize(SectionRow {
                section: &s.section,
                instructor: s.instructor.as_deref(),
                meeting_times: to_json(&s.meeting_times)?,
                campus: s.campus.as_deref(),
                seat_cap: s.seat_cap,
                data_id: s.data_id,
                course_id: s.course_id,
            })?;
        }
        w.flush()?;
        Ok(())
    }
}

fn has_content(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn write_header(path: &Path, header: &[&str]) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?;
    w.write_record(header)?;
    w.flush()?;
    Ok(())
}

fn appender(path: &Path) -> Result<csv::Writer<fs::File>> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {:?} for append", path))?;
    Ok(csv::WriterBuilder::new().has_headers(false).from_writer(file))
}

fn read_course_keys(path: &Path) -> Result<Vec<(CourseKey, u32)>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Failed to read {:?}", path))?;
    reader
        .deserialize::<CourseKeyRow>()
        .map(|row| {
            let row = row.with_context(|| format!("Bad course row in {:?}", path))?;
            Ok((CourseKey::new(row.subject, row.number), row.id))
        })
        .collect()
}

fn read_section_ids(path: &Path) -> Result<Vec<u64>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Failed to read {:?}", path))?;
    reader
        .deserialize::<SectionIdRow>()
        .map(|row| {
            row.map(|r| r.data_id)
                .with_context(|| format!("Bad section row in {:?}", path))
        })
        .collect()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}
