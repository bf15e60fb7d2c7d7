use shared::Lesson;
use std::sync::Arc;

use crate::error::WatcherResult;
use crate::portal::{AttendanceRow, Portal};

/// Column holding the roll-call page link
const ROLL_CALL_COLUMN: usize = 3;
/// Column holding the meeting link
const MEETING_LINK_COLUMN: usize = 4;
/// Shorter rows are headers or notices, not lessons
const MIN_LESSON_CELLS: usize = 6;

/// Finds a lesson's roll-call page in the attendance table
pub struct AttendancePageLocator {
    portal: Arc<dyn Portal>,
}

impl AttendancePageLocator {
    pub fn new(portal: Arc<dyn Portal>) -> Self {
        Self { portal }
    }

    /// Roll-call path for `lesson`, or an empty string while the portal does not list one
    pub async fn resolve_roll_call_url(&self, lesson: &Lesson) -> WatcherResult<String> {
        let rows = self.portal.fetch_attendance_table().await?;
        let path = find_roll_call_path(&rows, &lesson.meeting_link);

        if path.is_empty() {
            tracing::debug!("No rollcall URL found for {}", lesson.description);
        } else {
            tracing::debug!("Found rollcall url for {}", lesson.description);
        }
        Ok(path)
    }
}

fn find_roll_call_path(rows: &[AttendanceRow], meeting_link: &str) -> String {
    let meeting_link = meeting_link.trim();
    if meeting_link.is_empty() {
        return String::new();
    }

    rows.iter()
        .filter(|row| row.len() >= MIN_LESSON_CELLS)
        .find(|row| row[MEETING_LINK_COLUMN].trim() == meeting_link)
        .map(|row| row[ROLL_CALL_COLUMN].trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::mock::MockPortal;
    use chrono::Utc;
    use shared::CalendarEvent;

    fn row(roll_call: &str, link: &str) -> AttendanceRow {
        vec![
            "".into(),
            "".into(),
            "".into(),
            roll_call.into(),
            link.into(),
            "".into(),
        ]
    }

    fn lesson(meeting_link: &str) -> Lesson {
        let start = Utc::now();
        Lesson::from_event(&CalendarEvent {
            summary: "Algo".to_string(),
            description: meeting_link.to_string(),
            start,
            end: start + chrono::Duration::hours(2),
        })
    }

    #[test]
    fn test_matches_trimmed_meeting_link() {
        let rows = vec![row("/rollcall/1", "https://zoom/a"), row(" /rollcall/42 ", " https://zoom/x ")];
        assert_eq!(find_roll_call_path(&rows, "https://zoom/x"), "/rollcall/42");
    }

    #[test]
    fn test_short_rows_are_ignored() {
        let rows = vec![vec!["".into(), "".into(), "".into(), "/rollcall/9".into(), "https://zoom/x".into()]];
        assert_eq!(find_roll_call_path(&rows, "https://zoom/x"), "");
    }

    #[test]
    fn test_empty_meeting_link_never_matches() {
        let rows = vec![row("/rollcall/7", "")];
        assert_eq!(find_roll_call_path(&rows, "  "), "");
    }

    #[tokio::test]
    async fn test_resolve_from_portal() {
        let portal = Arc::new(MockPortal::new());
        portal.list_roll_call("https://zoom/x", "/rollcall/42");
        let locator = AttendancePageLocator::new(portal.clone());

        assert_eq!(
            locator.resolve_roll_call_url(&lesson("https://zoom/x")).await.unwrap(),
            "/rollcall/42"
        );
        assert_eq!(
            locator.resolve_roll_call_url(&lesson("https://zoom/unknown")).await.unwrap(),
            ""
        );
        assert_eq!(portal.calls().attendance_fetches, 2);
    }
}
