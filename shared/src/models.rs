use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Polling state of a lesson
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonState {
    AwaitingStart,
    Polling,
    OpenDetected,
    Expired,
}

impl LessonState {
    /// Terminal states never go back to polling
    pub fn is_terminal(self) -> bool {
        matches!(self, LessonState::OpenDetected | LessonState::Expired)
    }
}

/// Event read from the portal's calendar feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub summary: String,
    /// Free text; the portal puts the meeting link here
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A class for which the roll-call window is watched.
///
/// Identity is the start time: two lessons never share one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub description: String,
    /// Meeting link taken from the event description, used for matching only
    pub meeting_link: String,
    /// Portal path of the roll-call page, empty until resolved
    pub roll_call_path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_open: bool,
    pub state: LessonState,
}

impl Lesson {
    /// Build a lesson from a calendar event, labelled with its local start time
    pub fn from_event(event: &CalendarEvent) -> Self {
        let local_start = event.start.with_timezone(&Local);
        Self {
            description: format!("{} à {}", event.summary, local_start.format("%H:%M")),
            meeting_link: event.description.trim().to_string(),
            roll_call_path: String::new(),
            start_time: event.start,
            end_time: event.end,
            is_open: false,
            state: LessonState::AwaitingStart,
        }
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time
    }
}
