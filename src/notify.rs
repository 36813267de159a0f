use crate::diff::TimetableDiff;
use crate::models::{DiffKey, NewNotification, NotificationScope};

/// Notification type carried by every timetable change announcement.
pub const CLASS_CHANGE_TYPE: &str = "授業変更";

fn class_change(
    department_id: i32,
    class_id: i32,
    key: &DiffKey,
    message: String,
) -> NewNotification {
    NewNotification {
        notif_type: CLASS_CHANGE_TYPE.to_string(),
        message,
        scope: NotificationScope::Class,
        target_user_id: None,
        department_id: Some(department_id),
        class_id: Some(class_id),
        major_id: key.major_id,
    }
}

/// One notification per added/removed/changed slot, scoped to the class and
/// carrying the slot's major id.
pub fn diff_notifications(
    department_id: i32,
    class_id: i32,
    diff: &TimetableDiff,
) -> Vec<NewNotification> {
    let mut out = Vec::with_capacity(diff.len());

    for (key, value) in &diff.added {
        let message = format!(
            "{} {}限: 追加 {}（{}）",
            key.date, key.period, value.subject, value.teacher
        );
        out.push(class_change(department_id, class_id, key, message));
    }
    for (key, value) in &diff.removed {
        let message = format!(
            "{} {}限: 削除 {}（{}）",
            key.date, key.period, value.subject, value.teacher
        );
        out.push(class_change(department_id, class_id, key, message));
    }
    for (key, before, after) in &diff.changed {
        let message = format!(
            "{} {}限: 変更 {}（{}）→ {}（{}）",
            key.date, key.period, before.subject, before.teacher, after.subject, after.teacher
        );
        out.push(class_change(department_id, class_id, key, message));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SlotValue;
    use chrono::NaiveDate;

    fn key(major_id: Option<i32>) -> DiffKey {
        DiffKey {
            major_id,
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            period: 2,
        }
    }

    fn value(subject: &str, teacher: &str) -> SlotValue {
        SlotValue {
            subject: subject.to_string(),
            teacher: teacher.to_string(),
        }
    }

    #[test]
    fn one_notification_per_slot_with_class_scope() {
        let diff = TimetableDiff {
            added: vec![(key(Some(4)), value("数学", "Smith"))],
            removed: vec![(key(None), value("英語", "Lee"))],
            changed: vec![(key(None), value("数学", "Smith"), value("美術", "Smith"))],
        };
        let notifications = diff_notifications(10, 3, &diff);
        assert_eq!(notifications.len(), 3);
        assert!(notifications
            .iter()
            .all(|n| n.scope == NotificationScope::Class
                && n.class_id == Some(3)
                && n.department_id == Some(10)
                && n.notif_type == CLASS_CHANGE_TYPE));
        assert_eq!(notifications[0].major_id, Some(4));
        assert_eq!(notifications[1].major_id, None);
    }

    #[test]
    fn message_formats() {
        let diff = TimetableDiff {
            added: vec![(key(None), value("数学", "Smith"))],
            removed: vec![],
            changed: vec![(key(None), value("数学", "Smith"), value("美術", "Lee"))],
        };
        let notifications = diff_notifications(1, 1, &diff);
        assert_eq!(notifications[0].message, "2024-04-01 2限: 追加 数学（Smith）");
        assert_eq!(
            notifications[1].message,
            "2024-04-01 2限: 変更 数学（Smith）→ 美術（Lee）"
        );
    }
}
