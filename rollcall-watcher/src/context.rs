//! Service context shared by every component and scheduled task.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::attendance::AttendancePageLocator;
use crate::calendar::CalendarFetcher;
use crate::config::WatcherConfig;
use crate::lessons::LessonRegistry;
use crate::notify::{NotificationDispatcher, AUTH_FAILED_TITLE};
use crate::portal::Portal;
use crate::scheduler::Scheduler;
use crate::session::SessionManager;

/// Everything the watcher needs, built once at startup
pub struct ServiceContext {
    pub config: WatcherConfig,
    pub portal: Arc<dyn Portal>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub session: Arc<SessionManager>,
    pub calendar: CalendarFetcher,
    pub locator: AttendancePageLocator,
    pub registry: LessonRegistry,
    pub scheduler: Scheduler,
    shutdown: Notify,
    halted: AtomicBool,
}

impl ServiceContext {
    pub fn new(
        config: WatcherConfig,
        portal: Arc<dyn Portal>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Arc<Self> {
        let session = Arc::new(SessionManager::new(
            portal.clone(),
            config.login.clone(),
            config.password.clone(),
        ));

        Arc::new(Self {
            calendar: CalendarFetcher::new(portal.clone(), session.clone()),
            locator: AttendancePageLocator::new(portal.clone()),
            registry: LessonRegistry::new(),
            scheduler: Scheduler::new(),
            shutdown: Notify::new(),
            halted: AtomicBool::new(false),
            config,
            portal,
            notifier,
            session,
        })
    }

    /// Send a notification to every configured recipient; failures are logged, not retried
    pub async fn notify(&self, title: &str, body: &str) -> bool {
        match self
            .notifier
            .send(title, body, &self.config.recipients)
            .await
        {
            Ok(()) => {
                tracing::debug!("Notification sent: {}", title);
                true
            }
            Err(e) => {
                tracing::error!("Failed to send notification '{}': {}", title, e);
                false
            }
        }
    }

    /// Stop the watcher after an unrecoverable failure.
    ///
    /// The operator is notified first, then the scheduler stops so no further refresh or poll
    /// runs. Only the first call has any effect.
    pub async fn halt(&self, reason: impl Display) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!("Stopping watcher: {}", reason);

        let body = format!("Le bot s'arrête : {}", reason);
        self.notify(AUTH_FAILED_TITLE, &body).await;

        self.shutdown.notify_one();
        self.scheduler.stop();
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Resolves once `halt` has been called
    pub async fn wait_for_halt(&self) {
        if self.is_halted() {
            return;
        }
        self.shutdown.notified().await;
    }
}
