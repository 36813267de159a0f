//! Collaborator contracts between the sync core and its surroundings.
//!
//! Postgres implementations live in `db`; the Google Sheets implementation
//! of `SheetSource` lives in `sheets`. The orchestrator only depends on
//! these traits, so tests drive it against in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use crate::models::{
    ClassSlice, DateRange, DepartmentSheet, NewNotification, SlotMap, SyncStatus,
};

/// Supplies the raw worksheet grid, authentication opaque to the core.
#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch_grid(
        &self,
        spreadsheet_id: &str,
        worksheet_name: &str,
    ) -> SyncResult<Vec<Vec<String>>>;
}

/// Resolves classes and majors, and lists the departments to sync.
#[async_trait]
pub trait SchoolDirectory: Send + Sync {
    async fn resolve_class_id(&self, department_id: i32, grade: u8) -> SyncResult<Option<i32>>;

    /// Alias table lookup first, then direct major-name match.
    async fn resolve_major_id(&self, department_id: i32, alias: &str) -> SyncResult<Option<i32>>;

    async fn list_enabled_spreadsheets(&self) -> SyncResult<Vec<DepartmentSheet>>;
}

/// The persisted timetable. `replace_slices` is the transaction boundary:
/// all slices of one department commit together or not at all, and subject
/// and teacher entities are resolved inside that transaction.
#[async_trait]
pub trait TimetableStore: Send + Sync {
    async fn fetch_slice(&self, class_id: i32, range: &DateRange) -> SyncResult<SlotMap>;

    /// Delete each slice's span and reinsert its rows. Returns the number of
    /// rows written.
    async fn replace_slices(&self, slices: &[ClassSlice]) -> SyncResult<u64>;
}

/// Per-department record of sync attempts.
#[async_trait]
pub trait SyncRunLedger: Send + Sync {
    async fn last_success_at(&self, department_id: i32) -> SyncResult<Option<DateTime<Utc>>>;

    async fn record_run(
        &self,
        department_id: i32,
        status: SyncStatus,
        error: Option<&str>,
        mark_success: bool,
    ) -> SyncResult<()>;
}

/// Creates notifications; read/ack state lives elsewhere.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create(&self, notification: &NewNotification) -> SyncResult<i64>;
}
