//! The portal boundary.
//!
//! Every request the watcher makes to the portal goes through the [`Portal`] trait. The
//! reqwest-backed [`PortalClient`] shares one cookie jar across all calls, so a successful SSO
//! flow authenticates every later request. Markup knowledge lives in [`markup`] and calendar feed
//! parsing in [`feed`]; [`mock::MockPortal`] stands in for the portal in tests.

pub mod client;
pub mod feed;
pub mod markup;
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::CalendarEvent;

use crate::error::WatcherResult;

pub use client::PortalClient;

/// Cells of one attendance table row; each cell holds its link target (empty if none)
pub type AttendanceRow = Vec<String>;

/// Time range used to filter the calendar feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CalendarWindow {
    pub fn contains(&self, event: &CalendarEvent) -> bool {
        event.end >= self.start && event.start <= self.end
    }
}

/// What a roll-call page shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollCallStatus {
    /// The student is already marked present
    pub already_present: bool,
    /// Text of the "set presence" control; non-empty once the roll-call is open
    pub open_marker: String,
    /// The page is the login form, i.e. the session has expired
    pub session_expired: bool,
}

impl RollCallStatus {
    pub fn is_open(&self) -> bool {
        !self.open_marker.trim().is_empty()
    }
}

/// Named operations against the remote portal, without business logic
#[async_trait]
pub trait Portal: Send + Sync {
    /// Step 1 of SSO: announce the login, returns the raw payload carrying the redirect path
    async fn post_identity_assertion(&self, login: &str) -> WatcherResult<String>;

    /// Follow a portal path through its redirect chain, returns the final URL
    async fn follow_redirect(&self, path: &str) -> WatcherResult<String>;

    /// Post credentials to the identity provider, returns the signed assertion (may be empty)
    async fn post_credentials(
        &self,
        url: &str,
        login: &str,
        password: &str,
    ) -> WatcherResult<String>;

    /// Hand the assertion to the portal's assertion consumer
    async fn post_assertion(&self, token: &str, relay_state: &str) -> WatcherResult<()>;

    /// Fetch the home page, returns true when it shows the "not authenticated" marker
    async fn fetch_home(&self) -> WatcherResult<bool>;

    /// Path or URL of the calendar feed linked from the home page
    async fn fetch_calendar_link(&self) -> WatcherResult<Option<String>>;

    async fn fetch_calendar_feed(
        &self,
        path: &str,
        window: CalendarWindow,
    ) -> WatcherResult<Vec<CalendarEvent>>;

    async fn fetch_attendance_table(&self) -> WatcherResult<Vec<AttendanceRow>>;

    async fn fetch_roll_call_page(&self, path: &str) -> WatcherResult<RollCallStatus>;
}
