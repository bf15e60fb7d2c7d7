//! Types shared between the roll-call watcher and its push transport.

pub mod api;
pub mod models;

pub use api::{PushNotificationRequest, PushNotificationResponse};
pub use models::{CalendarEvent, Lesson, LessonState};
