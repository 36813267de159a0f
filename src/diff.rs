use crate::models::{DiffKey, SlotMap, SlotValue};

/// Differences between the persisted slice and a fresh merge for one class.
/// The three sets are disjoint by construction.
#[derive(Debug, Clone, Default)]
pub struct TimetableDiff {
    pub added: Vec<(DiffKey, SlotValue)>,
    pub removed: Vec<(DiffKey, SlotValue)>,
    pub changed: Vec<(DiffKey, SlotValue, SlotValue)>,
}

impl TimetableDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}

/// Compare old and new slot maps. Equality is exact string match on the
/// normalized (subject, teacher) pair; output order follows key order.
pub fn diff_slots(old: &SlotMap, new: &SlotMap) -> TimetableDiff {
    let mut diff = TimetableDiff::default();

    for (key, value) in new {
        match old.get(key) {
            None => diff.added.push((*key, value.clone())),
            Some(prev) if prev != value => {
                diff.changed.push((*key, prev.clone(), value.clone()));
            }
            Some(_) => {}
        }
    }
    for (key, value) in old {
        if !new.contains_key(key) {
            diff.removed.push((*key, value.clone()));
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn key(major_id: Option<i32>, period: u8) -> DiffKey {
        DiffKey {
            major_id,
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            period,
        }
    }

    fn value(subject: &str, teacher: &str) -> SlotValue {
        SlotValue {
            subject: subject.to_string(),
            teacher: teacher.to_string(),
        }
    }

    #[test]
    fn changed_pair_is_reported_once() {
        let mut old = SlotMap::new();
        old.insert(key(None, 1), value("数学", "Smith"));
        let mut new = SlotMap::new();
        new.insert(key(None, 1), value("美術", "Smith"));

        let diff = diff_slots(&old, &new);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.changed.len(), 1);
        let (k, before, after) = &diff.changed[0];
        assert_eq!(*k, key(None, 1));
        assert_eq!(before, &value("数学", "Smith"));
        assert_eq!(after, &value("美術", "Smith"));
    }

    #[test]
    fn added_and_removed_are_disjoint() {
        let mut old = SlotMap::new();
        old.insert(key(None, 1), value("数学", "Smith"));
        old.insert(key(Some(2), 3), value("美術", "Lee"));
        let mut new = SlotMap::new();
        new.insert(key(None, 1), value("数学", "Smith"));
        new.insert(key(None, 2), value("英語", "Kato"));

        let diff = diff_slots(&old, &new);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].0, key(None, 2));
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].0, key(Some(2), 3));
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn identical_maps_diff_empty() {
        let mut old = SlotMap::new();
        old.insert(key(Some(1), 1), value("数学", "Smith"));
        let diff = diff_slots(&old, &old.clone());
        assert!(diff.is_empty());
        assert_eq!(diff.len(), 0);
    }

    #[test]
    fn major_id_distinguishes_keys() {
        let mut old = SlotMap::new();
        old.insert(key(None, 1), value("数学", "Smith"));
        let mut new = SlotMap::new();
        new.insert(key(Some(1), 1), value("数学", "Smith"));

        let diff = diff_slots(&old, &new);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed.len(), 1);
        assert!(diff.changed.is_empty());
    }
}
