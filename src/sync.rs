use std::collections::{BTreeMap, HashMap};

use tracing::{error, info, warn};

use crate::diff::diff_slots;
use crate::error::SyncResult;
use crate::grid::{find_block_headers, parse_block_map, BlockHeader, BlockMap, Grid};
use crate::merge::{merge_common_only, merge_majors, overlay_common, MajorBlocks};
use crate::models::{
    BlockKind, ClassSlice, DateRange, DepartmentSheet, DiffKey, MajorScope, SlotMap, SlotValue,
    SyncStatus, TimetableRow,
};
use crate::notify::diff_notifications;
use crate::store::{NotificationSink, SchoolDirectory, SheetSource, SyncRunLedger, TimetableStore};

/// Drives the full reconciliation for departments: fetch, scan, merge, diff,
/// replace, notify, record. Collaborators are injected as traits so the
/// orchestration can run against in-memory stand-ins.
pub struct SyncService<'a> {
    pub sheets: &'a dyn SheetSource,
    pub directory: &'a dyn SchoolDirectory,
    pub store: &'a dyn TimetableStore,
    pub ledger: &'a dyn SyncRunLedger,
    pub notifications: &'a dyn NotificationSink,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub synced: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone)]
struct BlockIndexes {
    subject: Option<usize>,
    teacher: Option<usize>,
}

impl BlockIndexes {
    fn set(&mut self, kind: BlockKind, row_index: usize) {
        match kind {
            BlockKind::Subject => self.subject = Some(row_index),
            BlockKind::Teacher => self.teacher = Some(row_index),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct GradeHeaders {
    common: BlockIndexes,
    /// Major blocks in sheet order; duplicates are last-write-wins.
    majors: Vec<(String, BlockIndexes)>,
}

fn group_headers(headers: &[BlockHeader]) -> BTreeMap<u8, GradeHeaders> {
    let mut by_grade: BTreeMap<u8, GradeHeaders> = BTreeMap::new();
    for header in headers {
        let grade = by_grade.entry(header.grade).or_default();
        match &header.scope {
            MajorScope::Common => grade.common.set(header.kind, header.row_index),
            MajorScope::Major(alias) => {
                let position = match grade.majors.iter().position(|(a, _)| a == alias) {
                    Some(position) => position,
                    None => {
                        grade.majors.push((alias.clone(), BlockIndexes::default()));
                        grade.majors.len() - 1
                    }
                };
                grade.majors[position].1.set(header.kind, header.row_index);
            }
        }
    }
    by_grade
}

impl SyncService<'_> {
    /// Sync every enabled department sequentially. One department's failure
    /// is recorded and does not stop the rest of the batch.
    pub async fn sync_all(&self) -> SyncResult<BatchOutcome> {
        let sheets = self.directory.list_enabled_spreadsheets().await?;

        let mut outcome = BatchOutcome::default();
        for sheet in sheets {
            info!(
                department_id = sheet.department_id,
                worksheet = %sheet.worksheet_name,
                "syncing department"
            );
            match self.sync_department(&sheet).await {
                Ok(_) => outcome.synced += 1,
                Err(e) => {
                    error!(department_id = sheet.department_id, "sync failed: {e}");
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Sync one department. Returns the number of rows written. Any failure
    /// is recorded in the ledger before it propagates.
    pub async fn sync_department(&self, sheet: &DepartmentSheet) -> SyncResult<u64> {
        match self.run_department(sheet).await {
            Ok(written) => Ok(written),
            Err(e) => {
                let message = e.to_string();
                if let Err(ledger_err) = self
                    .ledger
                    .record_run(sheet.department_id, SyncStatus::Failed, Some(&message), false)
                    .await
                {
                    warn!(
                        department_id = sheet.department_id,
                        "could not record failed run: {ledger_err}"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_department(&self, sheet: &DepartmentSheet) -> SyncResult<u64> {
        let raw = self
            .sheets
            .fetch_grid(&sheet.spreadsheet_id, &sheet.worksheet_name)
            .await?;
        let grid = Grid::from_raw(raw);

        // First-import notification suppression hinges on this flag.
        let had_success_before = self
            .ledger
            .last_success_at(sheet.department_id)
            .await?
            .is_some();
        self.ledger
            .record_run(sheet.department_id, SyncStatus::Running, None, false)
            .await?;

        let rows = merge_grid(self.directory, sheet.department_id, &grid).await?;
        if rows.is_empty() {
            info!(
                department_id = sheet.department_id,
                "no timetable rows parsed"
            );
            return Ok(0);
        }

        let mut by_class: BTreeMap<i32, Vec<TimetableRow>> = BTreeMap::new();
        for row in rows {
            by_class.entry(row.class_id).or_default().push(row);
        }

        let mut slices = Vec::new();
        let mut pending = Vec::new();
        for (class_id, rows) in by_class {
            let Some(range) = DateRange::spanning(rows.iter().map(|r| r.date)) else {
                continue;
            };

            let old_map = self.store.fetch_slice(class_id, &range).await?;
            let mut new_map = SlotMap::new();
            for row in &rows {
                new_map.insert(
                    DiffKey {
                        major_id: row.major_id,
                        date: row.date,
                        period: row.period,
                    },
                    SlotValue {
                        subject: row.subject_name.clone(),
                        teacher: row.teacher_name.clone(),
                    },
                );
            }

            let diff = diff_slots(&old_map, &new_map);
            if had_success_before && !diff.is_empty() {
                pending.extend(diff_notifications(sheet.department_id, class_id, &diff));
            }
            slices.push(ClassSlice {
                class_id,
                range,
                rows,
            });
        }

        let written = self.store.replace_slices(&slices).await?;

        for notification in &pending {
            if let Err(e) = self.notifications.create(notification).await {
                warn!(
                    department_id = sheet.department_id,
                    "notification create failed: {e}"
                );
            }
        }

        self.ledger
            .record_run(sheet.department_id, SyncStatus::Success, None, true)
            .await?;
        info!(
            department_id = sheet.department_id,
            rows = written,
            "synced"
        );
        Ok(written)
    }
}

/// Scan a department's grid and merge every grade into timetable rows.
///
/// Class and major resolution go through the directory; a grade whose class
/// is unknown is skipped with a warning, an unresolved major alias falls
/// back to a common row.
pub async fn merge_grid(
    directory: &dyn SchoolDirectory,
    department_id: i32,
    grid: &Grid,
) -> SyncResult<Vec<TimetableRow>> {
    let headers = find_block_headers(grid);
    let by_grade = group_headers(&headers);

    let mut final_rows = Vec::new();
    for (grade, grade_headers) in by_grade {
        let Some(class_id) = directory.resolve_class_id(department_id, grade).await? else {
            warn!(department_id, grade, "class not found; skipping grade");
            continue;
        };

        let (common_subjects, common_teachers) = match grade_headers.common.subject {
            Some(subject_idx) => (
                parse_block_map(grid, subject_idx),
                grade_headers
                    .common
                    .teacher
                    .map(|idx| parse_block_map(grid, idx))
                    .unwrap_or_default(),
            ),
            None => (BlockMap::new(), BlockMap::new()),
        };

        let mut majors: Vec<MajorBlocks> = Vec::new();
        for (alias, indexes) in &grade_headers.majors {
            let Some(subject_idx) = indexes.subject else {
                continue;
            };
            majors.push(MajorBlocks {
                alias: alias.clone(),
                subjects: parse_block_map(grid, subject_idx),
                teachers: indexes
                    .teacher
                    .map(|idx| parse_block_map(grid, idx))
                    .unwrap_or_default(),
            });
        }

        if majors.is_empty() {
            if !common_subjects.is_empty() {
                final_rows.extend(merge_common_only(
                    class_id,
                    &common_subjects,
                    &common_teachers,
                ));
            }
            continue;
        }

        if !common_subjects.is_empty() {
            overlay_common(&mut majors, &common_subjects, &common_teachers);
        }

        let mut major_ids = HashMap::new();
        for major in &majors {
            let resolved = directory.resolve_major_id(department_id, &major.alias).await?;
            if resolved.is_none() {
                warn!(
                    department_id,
                    grade,
                    alias = %major.alias,
                    "major alias unresolved; treating as common"
                );
            }
            major_ids.insert(major.alias.clone(), resolved);
        }

        final_rows.extend(merge_majors(class_id, &majors, &major_ids));
    }
    Ok(final_rows)
}
