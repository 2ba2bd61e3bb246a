use std::time::Duration;

use thiserror::Error;

/// Failure reported by the browser automation layer.
///
/// Everything except [`AutomationError::SessionClosed`] is transient: the
/// caller may re-establish state and try again.
#[derive(Debug, Clone, Error)]
pub enum AutomationError {
    #[error("timed out after {waited:?} waiting for `{selector}`")]
    Timeout { selector: String, waited: Duration },
    #[error("no element matches `{0}`")]
    MissingElement(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("element went stale: {0}")]
    Stale(String),
    #[error("browser error: {0}")]
    Backend(String),
    #[error("session closed")]
    SessionClosed,
}

impl AutomationError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, AutomationError::SessionClosed)
    }
}

/// Captured row text that does not fit the expected grammar. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRow {
    #[error("course title has {found} lines, expected title and mode")]
    TitleLines { found: usize },
    #[error("meeting time missing `{label}` in {raw:?}")]
    MeetingLabel { label: &'static str, raw: String },
    #[error("meeting time has no time range in {0:?}")]
    MeetingRange(String),
    #[error("row identifier {0:?} is not numeric")]
    DataId(String),
    #[error("row has an empty subject or course number")]
    CourseKey,
}

/// Why a single row could not be turned into records.
#[derive(Debug, Clone, Error)]
pub enum RowError {
    #[error(transparent)]
    Malformed(#[from] MalformedRow),
    #[error(transparent)]
    Automation(#[from] AutomationError),
}

/// Errors that end a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("could not discover page and record counts: {0}")]
    Discovery(#[source] AutomationError),
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
    #[error("no worker completed ({0} launched)")]
    NoWorkerCompleted(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_closed_sessions_are_permanent() {
        assert!(AutomationError::MissingElement("tr".into()).is_transient());
        assert!(AutomationError::Timeout {
            selector: "tr[data-id]".into(),
            waited: Duration::from_millis(3000),
        }
        .is_transient());
        assert!(!AutomationError::SessionClosed.is_transient());
    }

    #[test]
    fn row_error_wraps_both_kinds() {
        let e: RowError = MalformedRow::CourseKey.into();
        assert!(matches!(e, RowError::Malformed(_)));
        let e: RowError = AutomationError::SessionClosed.into();
        assert!(matches!(e, RowError::Automation(_)));
    }
}
