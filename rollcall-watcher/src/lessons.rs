//! Lesson records and the registry that deduplicates them.

use chrono::{DateTime, Utc};
use shared::{CalendarEvent, Lesson, LessonState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared, mutable lesson record.
///
/// Every task scheduled for a lesson holds a clone of the same handle, so a roll-call path
/// resolved by one task is seen by the next tick of another.
#[derive(Debug, Clone)]
pub struct LessonHandle {
    inner: Arc<RwLock<Lesson>>,
}

impl LessonHandle {
    pub fn new(lesson: Lesson) -> Self {
        Self {
            inner: Arc::new(RwLock::new(lesson)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Lesson> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Lesson> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current copy of the record
    pub fn snapshot(&self) -> Lesson {
        self.read().clone()
    }

    pub fn description(&self) -> String {
        self.read().description.clone()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.read().start_time
    }

    pub fn state(&self) -> LessonState {
        self.read().state
    }

    pub fn roll_call_path(&self) -> String {
        self.read().roll_call_path.clone()
    }

    pub(crate) fn set_roll_call_path(&self, path: String) {
        self.write().roll_call_path = path;
    }

    pub(crate) fn set_state(&self, state: LessonState) {
        let mut lesson = self.write();
        lesson.state = state;
        if state == LessonState::OpenDetected {
            lesson.is_open = true;
        }
    }
}

/// Outcome of registering a calendar event
#[derive(Debug, Clone)]
pub enum Registration {
    New(LessonHandle),
    Duplicate,
}

/// Lessons known for this run, unique by start time
#[derive(Debug, Default)]
pub struct LessonRegistry {
    lessons: Mutex<Vec<LessonHandle>>,
}

impl LessonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lessons(&self) -> MutexGuard<'_, Vec<LessonHandle>> {
        self.lessons.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a lesson for `event` unless one with the same start time is already known
    pub fn register(&self, event: &CalendarEvent) -> Registration {
        let candidate = Lesson::from_event(event);
        let mut lessons = self.lessons();

        if lessons
            .iter()
            .any(|known| known.start_time() == candidate.start_time)
        {
            tracing::trace!("Lesson {} already listed", candidate.description);
            return Registration::Duplicate;
        }

        let handle = LessonHandle::new(candidate);
        lessons.push(handle.clone());
        Registration::New(handle)
    }

    pub fn len(&self) -> usize {
        self.lessons().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lessons_snapshot(&self) -> Vec<Lesson> {
        self.lessons().iter().map(LessonHandle::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(summary: &str, start_in_hours: i64) -> CalendarEvent {
        let start = Utc::now() + Duration::hours(start_in_hours);
        CalendarEvent {
            summary: summary.to_string(),
            description: "https://zoom/x".to_string(),
            start,
            end: start + Duration::hours(2),
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = LessonRegistry::new();
        let algo = event("Algo", 1);

        assert!(matches!(registry.register(&algo), Registration::New(_)));
        assert_eq!(registry.len(), 1);
        assert!(matches!(registry.register(&algo), Registration::Duplicate));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_start_time_is_duplicate_even_with_other_summary() {
        let registry = LessonRegistry::new();
        let algo = event("Algo", 1);
        let mut other = algo.clone();
        other.summary = "Reseaux".to_string();

        registry.register(&algo);
        assert!(matches!(registry.register(&other), Registration::Duplicate));
        assert_eq!(registry.lessons_snapshot()[0].description.split(' ').next(), Some("Algo"));
    }

    #[test]
    fn test_distinct_start_times_are_kept() {
        let registry = LessonRegistry::new();
        registry.register(&event("Algo", 1));
        registry.register(&event("Reseaux", 3));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_handle_updates_are_shared() {
        let registry = LessonRegistry::new();
        let Registration::New(handle) = registry.register(&event("Algo", 1)) else {
            panic!("expected a new lesson");
        };
        let copy = handle.clone();

        handle.set_roll_call_path("/rollcall/42".to_string());
        handle.set_state(LessonState::OpenDetected);

        assert_eq!(copy.roll_call_path(), "/rollcall/42");
        let lesson = copy.snapshot();
        assert!(lesson.is_open);
        assert_eq!(lesson.state, LessonState::OpenDetected);
        assert_eq!(registry.lessons_snapshot()[0].roll_call_path, "/rollcall/42");
    }
}
