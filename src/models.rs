use chrono::{DateTime, NaiveDate, Utc};

/// Placeholder teacher label for slots whose teacher cell is blank.
pub const UNDETERMINED_TEACHER: &str = "未定";

/// A (date, period) coordinate in the academic schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub period: u8,
}

/// Whether a grade block lists subjects or the teachers in charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Subject,
    Teacher,
}

/// Whether a block applies to every major of a grade or to one track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MajorScope {
    Common,
    Major(String),
}

/// One merged timetable entry. `major_id == None` means the slot is common
/// to all majors of the class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimetableRow {
    pub class_id: i32,
    pub major_id: Option<i32>,
    pub date: NaiveDate,
    pub period: u8,
    pub subject_name: String,
    pub teacher_name: String,
}

/// Key of a persisted slot within one class, used for diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiffKey {
    pub major_id: Option<i32>,
    pub date: NaiveDate,
    pub period: u8,
}

/// Denormalized (subject, teacher) pair held at a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotValue {
    pub subject: String,
    pub teacher: String,
}

pub type SlotMap = std::collections::BTreeMap<DiffKey, SlotValue>;

/// Inclusive calendar-date span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Smallest range covering all of `dates`. Empty input yields `None`.
    pub fn spanning<I: IntoIterator<Item = NaiveDate>>(dates: I) -> Option<Self> {
        let mut iter = dates.into_iter();
        let first = iter.next()?;
        let (mut start, mut end) = (first, first);
        for d in iter {
            start = start.min(d);
            end = end.max(d);
        }
        Some(DateRange { start, end })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Running,
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationScope {
    All,
    User,
    Department,
    Class,
}

impl NotificationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationScope::All => "ALL",
            NotificationScope::User => "USER",
            NotificationScope::Department => "DEPARTMENT",
            NotificationScope::Class => "CLASS",
        }
    }
}

/// A notification to be created in the sink. Read/ack state lives outside
/// the sync core.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub notif_type: String,
    pub message: String,
    pub scope: NotificationScope,
    pub target_user_id: Option<i32>,
    pub department_id: Option<i32>,
    pub class_id: Option<i32>,
    pub major_id: Option<i32>,
}

/// One enabled department-to-spreadsheet mapping.
#[derive(Debug, Clone)]
pub struct DepartmentSheet {
    pub department_id: i32,
    pub spreadsheet_id: String,
    pub worksheet_name: String,
}

/// The freshly merged rows for one class and the date span they cover.
#[derive(Debug, Clone)]
pub struct ClassSlice {
    pub class_id: i32,
    pub range: DateRange,
    pub rows: Vec<TimetableRow>,
}

/// Ledger entry for one department, as shown by `status`.
#[derive(Debug, Clone)]
pub struct SyncRunRecord {
    pub department_id: i32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spanning_covers_min_and_max() {
        let dates = [
            NaiveDate::from_ymd_opt(2024, 4, 3).unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
        ];
        let range = DateRange::spanning(dates).unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 4, 3).unwrap());
    }

    #[test]
    fn spanning_empty_is_none() {
        assert!(DateRange::spanning(std::iter::empty()).is_none());
    }
}
