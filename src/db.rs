use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::SyncResult;
use crate::grid::normalize_text;
use crate::models::{
    ClassSlice, DateRange, DepartmentSheet, DiffKey, NewNotification, SlotMap, SlotValue,
    SyncRunRecord, SyncStatus, UNDETERMINED_TEACHER,
};
use crate::store::{NotificationSink, SchoolDirectory, SyncRunLedger, TimetableStore};

/// Generated teacher accounts are allocated ids in `[100000, 200000)`.
pub const TEACHER_ID_BAND_START: i32 = 100_000;
pub const TEACHER_ID_BAND_END: i32 = 200_000;

/// Next free id in the reserved teacher band: one past the current maximum,
/// or the band floor when the band is empty.
pub fn next_teacher_user_id(current_max: Option<i32>) -> i32 {
    current_max.unwrap_or(TEACHER_ID_BAND_START - 1) + 1
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let department_id: i32 = sqlx::query(
        r#"
        INSERT INTO departments (name) VALUES ($1)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind("情報システム学科")
    .fetch_one(pool)
    .await?
    .get("id");

    for grade in 1..=3 {
        sqlx::query(
            r#"
            INSERT INTO classes (department_id, grade) VALUES ($1, $2)
            ON CONFLICT (department_id, grade) DO NOTHING
            "#,
        )
        .bind(department_id)
        .bind(grade)
        .execute(pool)
        .await?;
    }

    let majors = [("SC", "SC専攻"), ("AI・IoT", "AI・IoT専攻")];
    for (name, alias) in majors {
        sqlx::query(
            r#"
            INSERT INTO major (department_id, name) VALUES ($1, $2)
            ON CONFLICT (department_id, name) DO NOTHING
            "#,
        )
        .bind(department_id)
        .bind(name)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO major_aliases (department_id, alias_name, canonical_major_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (department_id, alias_name) DO UPDATE
            SET canonical_major_name = EXCLUDED.canonical_major_name
            "#,
        )
        .bind(department_id)
        .bind(alias)
        .bind(name)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO department_spreadsheets (department_id, spreadsheet_id, worksheet_name, enabled)
        VALUES ($1, $2, $3, TRUE)
        ON CONFLICT (department_id) DO UPDATE
        SET spreadsheet_id = EXCLUDED.spreadsheet_id,
            worksheet_name = EXCLUDED.worksheet_name,
            enabled = TRUE
        "#,
    )
    .bind(department_id)
    .bind("1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms")
    .bind("前期時間割")
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_sync_runs(pool: &PgPool) -> anyhow::Result<Vec<SyncRunRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT department_id, last_run_at, last_success_at, last_status, last_error
        FROM timetable_sync_runs
        ORDER BY department_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SyncRunRecord {
            department_id: row.get("department_id"),
            last_run_at: row.get("last_run_at"),
            last_success_at: row.get("last_success_at"),
            last_status: row.get("last_status"),
            last_error: row.get("last_error"),
        })
        .collect())
}

/// Postgres-backed implementation of the sync collaborator traits.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

async fn get_or_create_subject(
    tx: &mut Transaction<'_, Postgres>,
    subject_name: &str,
) -> SyncResult<Option<i32>> {
    let name = normalize_text(subject_name);
    if name.is_empty() || name == "-" {
        return Ok(None);
    }

    if let Some(row) = sqlx::query("SELECT id FROM subjects WHERE name = $1")
        .bind(&name)
        .fetch_optional(&mut **tx)
        .await?
    {
        return Ok(Some(row.get("id")));
    }

    let id: i32 = sqlx::query("INSERT INTO subjects (name) VALUES ($1) RETURNING id")
        .bind(&name)
        .fetch_one(&mut **tx)
        .await?
        .get("id");
    Ok(Some(id))
}

async fn get_or_create_teacher(
    tx: &mut Transaction<'_, Postgres>,
    teacher_name: &str,
) -> SyncResult<i32> {
    let mut name = normalize_text(teacher_name);
    if name.is_empty() || name == "-" {
        name = UNDETERMINED_TEACHER.to_string();
    }

    if let Some(row) = sqlx::query("SELECT user_id FROM teacher_users WHERE full_name = $1")
        .bind(&name)
        .fetch_optional(&mut **tx)
        .await?
    {
        return Ok(row.get("user_id"));
    }

    let max_id: Option<i32> = sqlx::query(
        "SELECT MAX(user_id) AS max_id FROM teacher_users WHERE user_id >= $1 AND user_id < $2",
    )
    .bind(TEACHER_ID_BAND_START)
    .bind(TEACHER_ID_BAND_END)
    .fetch_one(&mut **tx)
    .await?
    .get("max_id");

    let new_id = next_teacher_user_id(max_id);
    let email = format!("teacher_{new_id}@generated.local");
    sqlx::query("INSERT INTO teacher_users (user_id, full_name, email) VALUES ($1, $2, $3)")
        .bind(new_id)
        .bind(&name)
        .bind(&email)
        .execute(&mut **tx)
        .await?;
    Ok(new_id)
}

#[async_trait]
impl TimetableStore for PgStore {
    async fn fetch_slice(&self, class_id: i32, range: &DateRange) -> SyncResult<SlotMap> {
        let rows = sqlx::query(
            r#"
            SELECT t.major_id, t.date, t.period,
                   s.name AS subject_name, u.full_name AS teacher_name
            FROM timetables t
            LEFT JOIN subjects s ON t.subject_id = s.id
            LEFT JOIN teacher_users u ON t.teacher_id = u.user_id
            WHERE t.class_id = $1 AND t.date BETWEEN $2 AND $3
            "#,
        )
        .bind(class_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        let mut out = SlotMap::new();
        for row in rows {
            let period: i32 = row.get("period");
            let key = DiffKey {
                major_id: row.get("major_id"),
                date: row.get("date"),
                period: period as u8,
            };
            let subject: Option<String> = row.get("subject_name");
            let teacher: Option<String> = row.get("teacher_name");
            out.insert(
                key,
                SlotValue {
                    subject: normalize_text(&subject.unwrap_or_default()),
                    teacher: normalize_text(&teacher.unwrap_or_default()),
                },
            );
        }
        Ok(out)
    }

    async fn replace_slices(&self, slices: &[ClassSlice]) -> SyncResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for slice in slices {
            sqlx::query("DELETE FROM timetables WHERE class_id = $1 AND date BETWEEN $2 AND $3")
                .bind(slice.class_id)
                .bind(slice.range.start)
                .bind(slice.range.end)
                .execute(&mut *tx)
                .await?;

            for row in &slice.rows {
                let subject_id = get_or_create_subject(&mut tx, &row.subject_name).await?;
                let teacher_id = get_or_create_teacher(&mut tx, &row.teacher_name).await?;
                sqlx::query(
                    r#"
                    INSERT INTO timetables (class_id, major_id, date, period, subject_id, teacher_id)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(row.class_id)
                .bind(row.major_id)
                .bind(row.date)
                .bind(row.period as i32)
                .bind(subject_id)
                .bind(teacher_id)
                .execute(&mut *tx)
                .await?;
                written += 1;
            }
        }

        tx.commit().await?;
        Ok(written)
    }
}

#[async_trait]
impl SchoolDirectory for PgStore {
    async fn resolve_class_id(&self, department_id: i32, grade: u8) -> SyncResult<Option<i32>> {
        let row = sqlx::query(
            "SELECT id FROM classes WHERE department_id = $1 AND grade = $2 LIMIT 1",
        )
        .bind(department_id)
        .bind(grade as i32)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn resolve_major_id(&self, department_id: i32, alias: &str) -> SyncResult<Option<i32>> {
        let canonical: Option<String> = sqlx::query(
            r#"
            SELECT canonical_major_name FROM major_aliases
            WHERE department_id = $1 AND alias_name = $2
            "#,
        )
        .bind(department_id)
        .bind(alias)
        .fetch_optional(&self.pool)
        .await?
        .map(|r| r.get("canonical_major_name"));

        let name = canonical.unwrap_or_else(|| alias.to_string());
        let row = sqlx::query("SELECT id FROM major WHERE department_id = $1 AND name = $2")
            .bind(department_id)
            .bind(&name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn list_enabled_spreadsheets(&self) -> SyncResult<Vec<DepartmentSheet>> {
        let rows = sqlx::query(
            r#"
            SELECT department_id, spreadsheet_id, worksheet_name
            FROM department_spreadsheets
            WHERE enabled = TRUE
            ORDER BY department_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DepartmentSheet {
                department_id: row.get("department_id"),
                spreadsheet_id: row.get("spreadsheet_id"),
                worksheet_name: row.get("worksheet_name"),
            })
            .collect())
    }
}

#[async_trait]
impl SyncRunLedger for PgStore {
    async fn last_success_at(&self, department_id: i32) -> SyncResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT last_success_at FROM timetable_sync_runs WHERE department_id = $1",
        )
        .bind(department_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.get("last_success_at")))
    }

    async fn record_run(
        &self,
        department_id: i32,
        status: SyncStatus,
        error: Option<&str>,
        mark_success: bool,
    ) -> SyncResult<()> {
        let query = if mark_success {
            r#"
            INSERT INTO timetable_sync_runs
                (department_id, last_run_at, last_success_at, last_status, last_error)
            VALUES ($1, NOW(), NOW(), $2, $3)
            ON CONFLICT (department_id) DO UPDATE
            SET last_run_at = NOW(),
                last_success_at = NOW(),
                last_status = EXCLUDED.last_status,
                last_error = EXCLUDED.last_error
            "#
        } else {
            r#"
            INSERT INTO timetable_sync_runs
                (department_id, last_run_at, last_status, last_error)
            VALUES ($1, NOW(), $2, $3)
            ON CONFLICT (department_id) DO UPDATE
            SET last_run_at = NOW(),
                last_status = EXCLUDED.last_status,
                last_error = EXCLUDED.last_error
            "#
        };

        sqlx::query(query)
            .bind(department_id)
            .bind(status.as_str())
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for PgStore {
    async fn create(&self, notification: &NewNotification) -> SyncResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO notifications
                (type, message, scope, target_user_id, department_id, class_id, major_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&notification.notif_type)
        .bind(&notification.message)
        .bind(notification.scope.as_str())
        .bind(notification.target_user_id)
        .bind(notification.department_id)
        .bind(notification.class_id)
        .bind(notification.major_id)
        .fetch_one(&self.pool)
        .await?;
        let id: i32 = row.get("id");
        Ok(id as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teacher_band_starts_at_floor_when_empty() {
        assert_eq!(next_teacher_user_id(None), TEACHER_ID_BAND_START);
    }

    #[test]
    fn teacher_band_increments_current_max() {
        assert_eq!(next_teacher_user_id(Some(100_041)), 100_042);
    }
}
