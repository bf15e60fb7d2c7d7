//! Per-lesson roll-call detection.
//!
//! A lesson moves through `AwaitingStart -> Polling -> OpenDetected | Expired`. A one-shot task
//! fires at the lesson start, resolves the roll-call path and only then schedules the repeating
//! poll task. Each poll tick evaluates, in this order:
//!
//! 1. already marked present: `OpenDetected`, nothing to notify
//! 2. lesson over: `Expired`, whatever the page shows
//! 3. "set presence" control visible: notify once, `OpenDetected`
//! 4. otherwise keep polling
//!
//! The poll task cancels itself with the id it was given when scheduled, exactly once, on
//! reaching a terminal state. Errors inside a tick are logged by the scheduler and the next
//! tick retries, unless the lesson is already over: a failing tick after the end time still
//! expires the lesson.

use anyhow::Context;
use chrono::Utc;
use shared::LessonState;
use std::sync::Arc;

use crate::context::ServiceContext;
use crate::error::WatcherResult;
use crate::lessons::LessonHandle;
use crate::notify::ROLL_CALL_OPEN_TITLE;
use crate::portal::RollCallStatus;
use crate::scheduler::{Scheduler, Task, TaskId};

/// Result of one poll tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing conclusive yet, keep polling
    Pending,
    /// The student was already marked present
    AlreadyPresent,
    /// The lesson ended before the roll-call opened
    Expired,
    /// The roll-call opened and a notification was sent
    Opened,
}

impl TickOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TickOutcome::Pending)
    }
}

#[derive(Clone)]
pub struct PollingController {
    ctx: Arc<ServiceContext>,
}

impl PollingController {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Start watching a newly registered lesson.
    ///
    /// Tries to resolve the roll-call path right away, since the portal may already list it,
    /// then schedules the start-time task.
    pub async fn track(&self, lesson: LessonHandle) -> WatcherResult<TaskId> {
        self.try_resolve(&lesson).await;

        let controller = self.clone();
        let start = lesson.start_time();
        let task_lesson = lesson.clone();
        let id = self.ctx.scheduler.add(Task::once(start, move || {
            let controller = controller.clone();
            let lesson = task_lesson.clone();
            async move {
                controller.start_polling(lesson).await?;
                Ok::<_, anyhow::Error>(())
            }
        }))?;

        tracing::info!("Task {} scheduled", lesson.description());
        Ok(id)
    }

    /// `AwaitingStart -> Polling`: resolve the roll-call path, then schedule the poll task
    pub async fn start_polling(&self, lesson: LessonHandle) -> WatcherResult<TaskId> {
        self.try_resolve(&lesson).await;
        lesson.set_state(LessonState::Polling);

        let id = Scheduler::new_task_id();
        let controller = self.clone();
        let task_id = id.clone();
        let task_lesson = lesson.clone();
        self.ctx.scheduler.add_with_id(
            &id,
            Task::repeating(Utc::now(), self.ctx.config.poll_interval, move || {
                let controller = controller.clone();
                let lesson = task_lesson.clone();
                let id = task_id.clone();
                async move { controller.run_tick(&lesson, &id).await }
            }),
        )?;

        tracing::info!(
            "Polling roll-call for {} every {:?}",
            lesson.description(),
            self.ctx.config.poll_interval
        );
        Ok(id)
    }

    async fn try_resolve(&self, lesson: &LessonHandle) {
        if !lesson.roll_call_path().is_empty() {
            return;
        }
        match self.ctx.locator.resolve_roll_call_url(&lesson.snapshot()).await {
            Ok(path) if !path.is_empty() => lesson.set_roll_call_path(path),
            Ok(_) => {}
            Err(e) => tracing::warn!(
                "Could not resolve roll-call page for {}: {}",
                lesson.description(),
                e
            ),
        }
    }

    /// Body of the repeating poll task
    async fn run_tick(&self, lesson: &LessonHandle, task_id: &str) -> anyhow::Result<()> {
        if lesson.state().is_terminal() {
            tracing::debug!("Lesson {} already settled, skipping tick", lesson.description());
            return Ok(());
        }

        match self.poll_tick(lesson).await {
            Ok(outcome) if outcome.is_terminal() => {
                self.ctx.scheduler.cancel(task_id)?;
                let reason = match outcome {
                    TickOutcome::Expired => "lesson finished",
                    TickOutcome::AlreadyPresent => "already marked present",
                    _ => "rollcall opened",
                };
                tracing::info!("Task {} removed, {}", lesson.description(), reason);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.is_terminal() => {
                let message = e.to_string();
                self.ctx.halt(&message).await;
                Err(e).context("Roll-call check stopped")
            }
            Err(e) if lesson.snapshot().has_ended(Utc::now()) => {
                tracing::warn!(
                    "Roll-call check failed after {} ended: {}",
                    lesson.description(),
                    e
                );
                lesson.set_state(LessonState::Expired);
                self.ctx.scheduler.cancel(task_id)?;
                tracing::info!("Task {} removed, lesson finished", lesson.description());
                Ok(())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Roll-call check failed for {}", lesson.description()))
            }
        }
    }

    /// One evaluation of the lesson's roll-call page
    pub async fn poll_tick(&self, lesson: &LessonHandle) -> WatcherResult<TickOutcome> {
        tracing::info!("Checking if rollCall is open for {}", lesson.description());
        self.ctx.session.ensure_valid().await?;

        self.try_resolve(lesson).await;
        let path = lesson.roll_call_path();
        tracing::debug!("URL: {}", path);

        let status = if path.is_empty() {
            RollCallStatus::default()
        } else {
            self.ctx.portal.fetch_roll_call_page(&path).await?
        };

        if status.already_present {
            lesson.set_state(LessonState::OpenDetected);
            return Ok(TickOutcome::AlreadyPresent);
        }

        if lesson.snapshot().has_ended(Utc::now()) {
            lesson.set_state(LessonState::Expired);
            return Ok(TickOutcome::Expired);
        }

        if status.session_expired {
            self.ctx.session.recover_expired().await?;
            return Ok(TickOutcome::Pending);
        }

        if status.is_open() {
            tracing::info!("Roll call is open for {}", lesson.description());
            self.notify_open(lesson).await;
            lesson.set_state(LessonState::OpenDetected);
            return Ok(TickOutcome::Opened);
        }

        Ok(TickOutcome::Pending)
    }

    async fn notify_open(&self, lesson: &LessonHandle) {
        let body = format!("L'appel est ouvert pour le cours {}", lesson.description());
        self.ctx.notify(ROLL_CALL_OPEN_TITLE, &body).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatcherConfig;
    use crate::lessons::Registration;
    use crate::notify::RecordingNotifier;
    use crate::portal::mock::MockPortal;
    use chrono::{DateTime, Duration};
    use shared::CalendarEvent;

    struct Fixture {
        portal: Arc<MockPortal>,
        notifier: Arc<RecordingNotifier>,
        ctx: Arc<ServiceContext>,
        controller: PollingController,
    }

    fn fixture(poll_interval: std::time::Duration) -> Fixture {
        let portal = Arc::new(MockPortal::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let mut config = WatcherConfig::example();
        config.poll_interval = poll_interval;
        let ctx = ServiceContext::new(config, portal.clone(), notifier.clone());
        let controller = PollingController::new(ctx.clone());
        Fixture {
            portal,
            notifier,
            ctx,
            controller,
        }
    }

    fn register(ctx: &ServiceContext, start: DateTime<Utc>, end: DateTime<Utc>) -> LessonHandle {
        let event = CalendarEvent {
            summary: "Algo".to_string(),
            description: "https://zoom/x".to_string(),
            start,
            end,
        };
        match ctx.registry.register(&event) {
            Registration::New(handle) => handle,
            Registration::Duplicate => panic!("lesson already registered"),
        }
    }

    fn open_page() -> RollCallStatus {
        RollCallStatus {
            open_marker: "Valider".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_marker_notifies_once() {
        let f = fixture(std::time::Duration::from_secs(120));
        let now = Utc::now();
        let lesson = register(&f.ctx, now - Duration::minutes(5), now + Duration::hours(1));
        f.portal.list_roll_call("https://zoom/x", "/rollcall/42");
        f.portal.set_roll_call("/rollcall/42", open_page());

        let outcome = f.controller.poll_tick(&lesson).await.unwrap();

        assert_eq!(outcome, TickOutcome::Opened);
        assert_eq!(lesson.state(), LessonState::OpenDetected);
        assert!(lesson.snapshot().is_open);
        let sent = f.notifier.sent_with_title(ROLL_CALL_OPEN_TITLE);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Algo"));
    }

    #[tokio::test]
    async fn test_expiry_wins_over_open_marker() {
        let f = fixture(std::time::Duration::from_secs(120));
        let now = Utc::now();
        let lesson = register(&f.ctx, now - Duration::hours(2), now - Duration::minutes(1));
        f.portal.list_roll_call("https://zoom/x", "/rollcall/42");
        f.portal.set_roll_call("/rollcall/42", open_page());

        let outcome = f.controller.poll_tick(&lesson).await.unwrap();

        assert_eq!(outcome, TickOutcome::Expired);
        assert_eq!(lesson.state(), LessonState::Expired);
        assert!(f.notifier.sent_with_title(ROLL_CALL_OPEN_TITLE).is_empty());
    }

    #[tokio::test]
    async fn test_already_present_is_silent() {
        let f = fixture(std::time::Duration::from_secs(120));
        let now = Utc::now();
        let lesson = register(&f.ctx, now - Duration::hours(2), now - Duration::minutes(1));
        f.portal.list_roll_call("https://zoom/x", "/rollcall/42");
        f.portal.set_roll_call(
            "/rollcall/42",
            RollCallStatus {
                already_present: true,
                open_marker: "Valider".to_string(),
                ..Default::default()
            },
        );

        let outcome = f.controller.poll_tick(&lesson).await.unwrap();

        assert_eq!(outcome, TickOutcome::AlreadyPresent);
        assert_eq!(lesson.state(), LessonState::OpenDetected);
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unlisted_roll_call_keeps_polling() {
        let f = fixture(std::time::Duration::from_secs(120));
        let now = Utc::now();
        let lesson = register(&f.ctx, now - Duration::minutes(5), now + Duration::hours(1));

        let outcome = f.controller.poll_tick(&lesson).await.unwrap();

        assert_eq!(outcome, TickOutcome::Pending);
        assert_eq!(f.portal.calls().roll_call_fetches, 0);
        assert_eq!(f.portal.calls().attendance_fetches, 1);
    }

    #[tokio::test]
    async fn test_login_form_on_roll_call_page_relogs_and_retries() {
        let f = fixture(std::time::Duration::from_secs(120));
        let now = Utc::now();
        let lesson = register(&f.ctx, now - Duration::minutes(5), now + Duration::hours(1));
        lesson.set_roll_call_path("/rollcall/42".to_string());
        f.portal.set_roll_call("/rollcall/42", open_page());
        f.portal.show_login_on_roll_calls(1);

        let first = f.controller.poll_tick(&lesson).await.unwrap();
        assert_eq!(first, TickOutcome::Pending);
        assert_eq!(lesson.state(), LessonState::AwaitingStart);
        assert!(f.portal.is_authenticated());
        assert_eq!(f.portal.calls().identity_assertions, 2);

        let second = f.controller.poll_tick(&lesson).await.unwrap();
        assert_eq!(second, TickOutcome::Opened);
        assert_eq!(f.notifier.sent_with_title(ROLL_CALL_OPEN_TITLE).len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_polling_state() {
        let f = fixture(std::time::Duration::from_millis(10));
        let now = Utc::now();
        let lesson = register(&f.ctx, now, now + Duration::hours(1));
        f.portal.list_roll_call("https://zoom/x", "/rollcall/42");
        f.portal.fail_roll_calls(2);

        let id = f.controller.start_polling(lesson.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        assert!(f.ctx.scheduler.contains(&id));
        assert_eq!(lesson.state(), LessonState::Polling);
        assert!(f.portal.calls().roll_call_fetches >= 3);

        f.portal.set_roll_call("/rollcall/42", open_page());
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(!f.ctx.scheduler.contains(&id));
        assert_eq!(lesson.state(), LessonState::OpenDetected);
        assert_eq!(f.notifier.sent_with_title(ROLL_CALL_OPEN_TITLE).len(), 1);
    }

    #[tokio::test]
    async fn test_no_tick_after_terminal_state() {
        let f = fixture(std::time::Duration::from_millis(10));
        let now = Utc::now();
        let lesson = register(&f.ctx, now - Duration::hours(2), now - Duration::minutes(1));
        f.portal.list_roll_call("https://zoom/x", "/rollcall/42");

        let id = f.controller.start_polling(lesson.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let calls = f.portal.calls();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(lesson.state(), LessonState::Expired);
        assert!(!f.ctx.scheduler.contains(&id));
        assert_eq!(calls.roll_call_fetches, 1);
        assert_eq!(f.portal.calls(), calls);
    }

    #[tokio::test]
    async fn test_ended_lesson_expires_despite_failing_page() {
        let f = fixture(std::time::Duration::from_millis(10));
        let now = Utc::now();
        let lesson = register(&f.ctx, now - Duration::hours(2), now - Duration::minutes(1));
        f.portal.list_roll_call("https://zoom/x", "/rollcall/42");
        f.portal.fail_roll_calls(usize::MAX);

        let id = f.controller.start_polling(lesson.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(lesson.state(), LessonState::Expired);
        assert!(!f.ctx.scheduler.contains(&id));
        assert_eq!(f.portal.calls().roll_call_fetches, 1);
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ended_lesson_expires_when_session_check_fails() {
        let f = fixture(std::time::Duration::from_millis(10));
        let now = Utc::now();
        let lesson = register(&f.ctx, now - Duration::hours(2), now - Duration::minutes(1));
        f.portal.fail_home_fetches(usize::MAX);

        let id = f.controller.start_polling(lesson.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(lesson.state(), LessonState::Expired);
        assert!(!f.ctx.scheduler.contains(&id));
        assert!(!f.ctx.is_halted());
        assert_eq!(f.portal.calls().home_fetches, 1);
        assert_eq!(f.portal.calls().roll_call_fetches, 0);
    }

    #[tokio::test]
    async fn test_failing_tick_before_end_keeps_polling() {
        let f = fixture(std::time::Duration::from_millis(10));
        let now = Utc::now();
        let lesson = register(&f.ctx, now - Duration::minutes(5), now + Duration::hours(1));
        f.portal.fail_home_fetches(usize::MAX);

        let id = f.controller.start_polling(lesson.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        assert_eq!(lesson.state(), LessonState::Polling);
        assert!(f.ctx.scheduler.contains(&id));
        assert!(f.portal.calls().home_fetches >= 2);
        f.ctx.scheduler.stop();
    }

    #[tokio::test]
    async fn test_track_schedules_start_task_and_resolves_eagerly() {
        let f = fixture(std::time::Duration::from_secs(120));
        let now = Utc::now();
        let lesson = register(&f.ctx, now + Duration::hours(1), now + Duration::hours(3));
        f.portal.list_roll_call("https://zoom/x", "/rollcall/42");

        let id = f.controller.track(lesson.clone()).await.unwrap();

        assert!(f.ctx.scheduler.contains(&id));
        assert_eq!(lesson.roll_call_path(), "/rollcall/42");
        assert_eq!(lesson.state(), LessonState::AwaitingStart);
        f.ctx.scheduler.stop();
    }

    #[tokio::test]
    async fn test_rejected_credentials_halt_polling() {
        let f = fixture(std::time::Duration::from_millis(10));
        f.portal.reject_credentials();
        let now = Utc::now();
        let lesson = register(&f.ctx, now, now + Duration::hours(1));

        f.controller.start_polling(lesson.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(f.ctx.is_halted());
        assert!(f.ctx.scheduler.is_empty());
        assert_eq!(f.portal.calls().identity_assertions, 1);
        assert_eq!(lesson.state(), LessonState::Polling);
    }
}
