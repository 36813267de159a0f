//! Error types for timetable synchronization.

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced to the per-department orchestration boundary.
///
/// Structural problems in the grid (bad dates, malformed headers) and
/// unresolved aliases are recovered locally with a logged skip or fallback
/// and never become error values. Auth failures abort the whole batch;
/// everything else fails only the department being synced.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("spreadsheet authorization failed: {0}")]
    Auth(String),

    #[error("spreadsheet read failed: {0}")]
    SheetRead(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Store(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::SheetRead(e.to_string())
    }
}
