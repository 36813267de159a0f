use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::grid::BlockMap;
use crate::models::{SlotKey, TimetableRow, UNDETERMINED_TEACHER};

/// Subject and teacher block maps parsed for one major of a grade, in the
/// order the majors appear in the sheet.
#[derive(Debug, Clone)]
pub struct MajorBlocks {
    pub alias: String,
    pub subjects: BlockMap,
    pub teachers: BlockMap,
}

/// Cells holding `""` or `"-"` count as absent.
pub fn is_effectively_empty(value: &str) -> bool {
    value.is_empty() || value == "-"
}

fn clean(value: Option<&String>) -> Option<String> {
    value
        .map(String::as_str)
        .filter(|v| !is_effectively_empty(v))
        .map(str::to_string)
}

/// Overlay a grade's common block onto each major: a common cell fills a
/// slot only where the major's own cell is absent or blank. A major's own
/// content is never overwritten.
pub fn overlay_common(
    majors: &mut [MajorBlocks],
    common_subjects: &BlockMap,
    common_teachers: &BlockMap,
) {
    for major in majors.iter_mut() {
        for (key, value) in common_subjects {
            let slot = major.subjects.entry(*key).or_default();
            if is_effectively_empty(slot) {
                *slot = value.clone();
            }
        }
        for (key, value) in common_teachers {
            let slot = major.teachers.entry(*key).or_default();
            if is_effectively_empty(slot) {
                *slot = value.clone();
            }
        }
    }
}

/// No-major mode: every subject slot becomes one common row. Teacher-only
/// slots are dropped; a missing teacher becomes the placeholder label.
pub fn merge_common_only(
    class_id: i32,
    subjects: &BlockMap,
    teachers: &BlockMap,
) -> Vec<TimetableRow> {
    let keys: BTreeSet<SlotKey> = subjects.keys().chain(teachers.keys()).copied().collect();

    let mut out = Vec::new();
    for key in keys {
        let Some(subject) = clean(subjects.get(&key)) else {
            continue;
        };
        let teacher =
            clean(teachers.get(&key)).unwrap_or_else(|| UNDETERMINED_TEACHER.to_string());
        out.push(TimetableRow {
            class_id,
            major_id: None,
            date: key.date,
            period: key.period,
            subject_name: subject,
            teacher_name: teacher,
        });
    }
    out
}

#[derive(Debug, Clone, Default)]
struct SlotEntry {
    subject: Option<String>,
    teacher: Option<String>,
}

/// Multi-major merge for one grade.
///
/// `major_ids` carries the pre-resolved alias-to-id mapping; an alias that
/// failed to resolve maps to `None` and its split rows fall back to common
/// (documented, non-fatal).
pub fn merge_majors(
    class_id: i32,
    majors: &[MajorBlocks],
    major_ids: &HashMap<String, Option<i32>>,
) -> Vec<TimetableRow> {
    let all_keys: BTreeSet<SlotKey> = majors
        .iter()
        .flat_map(|m| m.subjects.keys().chain(m.teachers.keys()))
        .copied()
        .collect();

    // Per slot, one entry per major in sheet order.
    let mut slots: BTreeMap<SlotKey, Vec<SlotEntry>> = BTreeMap::new();
    for &key in &all_keys {
        let entries = majors
            .iter()
            .map(|m| SlotEntry {
                subject: clean(m.subjects.get(&key)),
                teacher: clean(m.teachers.get(&key)),
            })
            .collect();
        slots.insert(key, entries);
    }

    // Backfill: a major with a teacher but no subject borrows the first
    // peer subject at the same slot; a subject without a teacher gets the
    // placeholder.
    for entries in slots.values_mut() {
        let borrowed = entries.iter().find_map(|e| e.subject.clone());
        for entry in entries.iter_mut() {
            if entry.teacher.is_some() && entry.subject.is_none() {
                entry.subject = borrowed.clone();
            }
        }
        for entry in entries.iter_mut() {
            if entry.subject.is_some() && entry.teacher.is_none() {
                entry.teacher = Some(UNDETERMINED_TEACHER.to_string());
            }
        }
    }

    // A subject seen alongside a different subject in the same slot is
    // major-specific for the whole run.
    let mut specific_subjects: BTreeSet<String> = BTreeSet::new();
    for entries in slots.values() {
        let distinct: BTreeSet<&String> =
            entries.iter().filter_map(|e| e.subject.as_ref()).collect();
        if distinct.len() >= 2 {
            specific_subjects.extend(distinct.into_iter().cloned());
        }
    }

    let mut out = Vec::new();
    for (key, entries) in &slots {
        let contributing: Vec<usize> = (0..majors.len())
            .filter(|&i| entries[i].subject.is_some())
            .collect();
        if contributing.is_empty() {
            continue;
        }

        let subjects: BTreeSet<&String> = contributing
            .iter()
            .filter_map(|&i| entries[i].subject.as_ref())
            .collect();
        let teachers: BTreeSet<&String> = contributing
            .iter()
            .filter_map(|&i| entries[i].teacher.as_ref())
            .collect();

        let is_common = match contributing.as_slice() {
            _ if subjects.len() == 1 && teachers.len() == 1 => true,
            [only] => entries[*only]
                .subject
                .as_ref()
                .map(|s| !specific_subjects.contains(s))
                .unwrap_or(false),
            _ => false,
        };

        if is_common {
            let pick = &entries[contributing[0]];
            out.push(TimetableRow {
                class_id,
                major_id: None,
                date: key.date,
                period: key.period,
                subject_name: pick.subject.clone().unwrap_or_default(),
                teacher_name: pick
                    .teacher
                    .clone()
                    .unwrap_or_else(|| UNDETERMINED_TEACHER.to_string()),
            });
            continue;
        }

        for &i in &contributing {
            let entry = &entries[i];
            let major_id = major_ids
                .get(&majors[i].alias)
                .copied()
                .flatten();
            out.push(TimetableRow {
                class_id,
                major_id,
                date: key.date,
                period: key.period,
                subject_name: entry.subject.clone().unwrap_or_default(),
                teacher_name: entry
                    .teacher
                    .clone()
                    .unwrap_or_else(|| UNDETERMINED_TEACHER.to_string()),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn slot(period: u8) -> SlotKey {
        SlotKey {
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            period,
        }
    }

    fn block(entries: &[(SlotKey, &str)]) -> BlockMap {
        entries
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect()
    }

    fn major(alias: &str, subjects: BlockMap, teachers: BlockMap) -> MajorBlocks {
        MajorBlocks {
            alias: alias.to_string(),
            subjects,
            teachers,
        }
    }

    fn ids(pairs: &[(&str, Option<i32>)]) -> HashMap<String, Option<i32>> {
        pairs
            .iter()
            .map(|(a, id)| (a.to_string(), *id))
            .collect()
    }

    #[test]
    fn identical_pairs_merge_to_one_common_row() {
        let a = major(
            "A専攻",
            block(&[(slot(1), "数学")]),
            block(&[(slot(1), "Smith")]),
        );
        let b = major(
            "B専攻",
            block(&[(slot(1), "数学")]),
            block(&[(slot(1), "Smith")]),
        );
        let rows = merge_majors(1, &[a, b], &ids(&[("A専攻", Some(1)), ("B専攻", Some(2))]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].major_id, None);
        assert_eq!(rows[0].subject_name, "数学");
        assert_eq!(rows[0].teacher_name, "Smith");
    }

    #[test]
    fn diverging_pairs_split_per_major() {
        let a = major(
            "A専攻",
            block(&[(slot(1), "数学")]),
            block(&[(slot(1), "Smith")]),
        );
        let b = major(
            "B専攻",
            block(&[(slot(1), "美術")]),
            block(&[(slot(1), "Lee")]),
        );
        let rows = merge_majors(1, &[a, b], &ids(&[("A専攻", Some(1)), ("B専攻", Some(2))]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].major_id, Some(1));
        assert_eq!(rows[0].subject_name, "数学");
        assert_eq!(rows[1].major_id, Some(2));
        assert_eq!(rows[1].subject_name, "美術");
        assert!(rows.iter().all(|r| r.major_id.is_some()));
    }

    #[test]
    fn teacher_only_slot_borrows_peer_subject() {
        let a = major("A専攻", BlockMap::new(), block(&[(slot(1), "Lee")]));
        let b = major(
            "B専攻",
            block(&[(slot(1), "美術")]),
            block(&[(slot(1), "Kato")]),
        );
        let rows = merge_majors(1, &[a, b], &ids(&[("A専攻", Some(1)), ("B専攻", Some(2))]));
        // Same borrowed subject but different teachers: the slot splits.
        assert_eq!(rows.len(), 2);
        let row_a = rows.iter().find(|r| r.major_id == Some(1)).unwrap();
        assert_eq!(row_a.subject_name, "美術");
        assert_eq!(row_a.teacher_name, "Lee");
    }

    #[test]
    fn missing_teacher_becomes_undetermined() {
        let a = major("A専攻", block(&[(slot(1), "数学")]), BlockMap::new());
        let b = major("B専攻", block(&[(slot(1), "数学")]), BlockMap::new());
        let rows = merge_majors(1, &[a, b], &ids(&[("A専攻", Some(1)), ("B専攻", Some(2))]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].teacher_name, UNDETERMINED_TEACHER);
    }

    #[test]
    fn lone_major_slot_is_common_even_with_specific_subject() {
        // Period 1 marks both subjects specific. Period 2 has only major A,
        // whose single (subject, teacher) pair satisfies the first
        // commonality branch before the specific-subject check is reached.
        let a = major(
            "A専攻",
            block(&[(slot(1), "数学"), (slot(2), "数学")]),
            block(&[(slot(1), "Smith"), (slot(2), "Smith")]),
        );
        let b = major(
            "B専攻",
            block(&[(slot(1), "美術")]),
            block(&[(slot(1), "Lee")]),
        );
        let rows = merge_majors(1, &[a, b], &ids(&[("A専攻", Some(1)), ("B専攻", Some(2))]));
        let p2: Vec<_> = rows.iter().filter(|r| r.period == 2).collect();
        assert_eq!(p2.len(), 1);
        assert_eq!(p2[0].major_id, None);
    }

    #[test]
    fn lone_major_with_ordinary_subject_is_common() {
        let a = major(
            "A専攻",
            block(&[(slot(1), "国語")]),
            block(&[(slot(1), "Sato")]),
        );
        let b = major("B専攻", BlockMap::new(), BlockMap::new());
        let rows = merge_majors(1, &[a, b], &ids(&[("A専攻", Some(1)), ("B専攻", Some(2))]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].major_id, None);
    }

    #[test]
    fn unresolved_alias_falls_back_to_common_row() {
        let a = major(
            "A専攻",
            block(&[(slot(1), "数学")]),
            block(&[(slot(1), "Smith")]),
        );
        let b = major(
            "B専攻",
            block(&[(slot(1), "美術")]),
            block(&[(slot(1), "Lee")]),
        );
        let rows = merge_majors(1, &[a, b], &ids(&[("A専攻", Some(1)), ("B専攻", None)]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].major_id, None);
    }

    #[test]
    fn common_only_drops_teacher_only_slots() {
        let subjects = block(&[(slot(1), "数学"), (slot(3), "-")]);
        let teachers = block(&[(slot(1), "Smith"), (slot(2), "Lee")]);
        let rows = merge_common_only(7, &subjects, &teachers);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].class_id, 7);
        assert_eq!(rows[0].major_id, None);
        assert_eq!(rows[0].period, 1);
    }

    #[test]
    fn common_only_fills_missing_teacher() {
        let subjects = block(&[(slot(1), "数学")]);
        let rows = merge_common_only(1, &subjects, &BlockMap::new());
        assert_eq!(rows[0].teacher_name, UNDETERMINED_TEACHER);
    }

    #[test]
    fn overlay_fills_only_blank_major_cells() {
        let mut majors = vec![major(
            "A専攻",
            block(&[(slot(1), "数学"), (slot(2), "-")]),
            BlockMap::new(),
        )];
        let common_subjects = block(&[(slot(1), "体育"), (slot(2), "体育"), (slot(3), "体育")]);
        overlay_common(&mut majors, &common_subjects, &BlockMap::new());
        assert_eq!(majors[0].subjects[&slot(1)], "数学");
        assert_eq!(majors[0].subjects[&slot(2)], "体育");
        assert_eq!(majors[0].subjects[&slot(3)], "体育");
    }
}
