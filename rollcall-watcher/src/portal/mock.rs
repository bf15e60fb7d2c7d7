//! Mock portal for unit/integration testing

use async_trait::async_trait;
use shared::CalendarEvent;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{AttendanceRow, CalendarWindow, Portal, RollCallStatus};
use crate::error::{WatcherError, WatcherResult};

pub const MOCK_REDIRECT_PATH: &str = "/login/saml?return=%2F";
pub const MOCK_IDP_URL: &str = "https://idp.example/adfs/ls/";
pub const MOCK_ASSERTION: &str = "PHNhbWxwOlJlc3BvbnNlLz4=";

/// Request counters, one per portal operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub identity_assertions: usize,
    pub redirects: usize,
    pub credential_posts: usize,
    pub assertion_posts: usize,
    pub home_fetches: usize,
    pub calendar_fetches: usize,
    pub attendance_fetches: usize,
    pub roll_call_fetches: usize,
}

#[derive(Debug)]
struct MockState {
    authenticated: bool,
    credentials_valid: bool,
    calendar_link: Option<String>,
    events: Vec<CalendarEvent>,
    attendance: Vec<AttendanceRow>,
    roll_calls: HashMap<String, RollCallStatus>,
    failing_roll_calls: usize,
    stale_roll_calls: usize,
    failing_home_fetches: usize,
    ignore_assertions: bool,
    calls: MockCalls,
}

/// In-memory portal with a simulated session
pub struct MockPortal {
    state: Mutex<MockState>,
    login_delay: Duration,
}

impl MockPortal {
    /// A portal with no session yet and valid credentials
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                authenticated: false,
                credentials_valid: true,
                calendar_link: Some("/ical/student.ics".to_string()),
                events: Vec::new(),
                attendance: Vec::new(),
                roll_calls: HashMap::new(),
                failing_roll_calls: 0,
                stale_roll_calls: 0,
                failing_home_fetches: 0,
                ignore_assertions: false,
                calls: MockCalls::default(),
            }),
            login_delay: Duration::ZERO,
        }
    }

    /// Slow down the first SSO step, widening the window for concurrent logins
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> MockCalls {
        self.state().calls.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    /// Simulate the portal dropping our session
    pub fn expire_session(&self) {
        self.state().authenticated = false;
    }

    /// Simulate the identity provider rejecting our password
    pub fn reject_credentials(&self) {
        self.state().credentials_valid = false;
    }

    pub fn set_calendar_link(&self, link: Option<&str>) {
        self.state().calendar_link = link.map(str::to_string);
    }

    pub fn add_event(&self, event: CalendarEvent) {
        self.state().events.push(event);
    }

    /// Add an attendance row whose link column is `meeting_link` and roll-call column `path`
    pub fn list_roll_call(&self, meeting_link: &str, path: &str) {
        let row = vec![
            String::new(),
            String::new(),
            String::new(),
            path.to_string(),
            meeting_link.to_string(),
            String::new(),
        ];
        self.state().attendance.push(row);
    }

    pub fn set_roll_call(&self, path: &str, status: RollCallStatus) {
        self.state().roll_calls.insert(path.to_string(), status);
    }

    /// Make the next `count` roll-call fetches fail
    pub fn fail_roll_calls(&self, count: usize) {
        self.state().failing_roll_calls = count;
    }

    /// Make the next `count` home page fetches fail
    pub fn fail_home_fetches(&self, count: usize) {
        self.state().failing_home_fetches = count;
    }

    /// Accept assertions without issuing a session, as a misconfigured service provider would
    pub fn ignore_assertions(&self) {
        self.state().ignore_assertions = true;
    }

    /// Make the next `count` roll-call fetches show the login form while the home page still
    /// looks logged in
    pub fn show_login_on_roll_calls(&self, count: usize) {
        self.state().stale_roll_calls = count;
    }
}

impl Default for MockPortal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Portal for MockPortal {
    async fn post_identity_assertion(&self, _login: &str) -> WatcherResult<String> {
        self.state().calls.identity_assertions += 1;
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }
        Ok(format!(
            r#"<script>document.location.href="{}";</script>"#,
            MOCK_REDIRECT_PATH
        ))
    }

    async fn follow_redirect(&self, path: &str) -> WatcherResult<String> {
        let mut state = self.state();
        state.calls.redirects += 1;
        if state.authenticated {
            Ok(format!("https://portal.example{}", path))
        } else {
            Ok(MOCK_IDP_URL.to_string())
        }
    }

    async fn post_credentials(
        &self,
        _url: &str,
        _login: &str,
        _password: &str,
    ) -> WatcherResult<String> {
        let mut state = self.state();
        state.calls.credential_posts += 1;
        if state.credentials_valid {
            Ok(MOCK_ASSERTION.to_string())
        } else {
            Ok(String::new())
        }
    }

    async fn post_assertion(&self, token: &str, relay_state: &str) -> WatcherResult<()> {
        let mut state = self.state();
        state.calls.assertion_posts += 1;
        if !state.ignore_assertions && token == MOCK_ASSERTION && relay_state == MOCK_REDIRECT_PATH {
            state.authenticated = true;
        }
        Ok(())
    }

    async fn fetch_home(&self) -> WatcherResult<bool> {
        let mut state = self.state();
        state.calls.home_fetches += 1;
        if state.failing_home_fetches > 0 {
            state.failing_home_fetches -= 1;
            return Err(WatcherError::parse("simulated home page failure"));
        }
        Ok(!state.authenticated)
    }

    async fn fetch_calendar_link(&self) -> WatcherResult<Option<String>> {
        let state = self.state();
        if state.authenticated {
            Ok(state.calendar_link.clone())
        } else {
            Ok(None)
        }
    }

    async fn fetch_calendar_feed(
        &self,
        _path: &str,
        window: CalendarWindow,
    ) -> WatcherResult<Vec<CalendarEvent>> {
        let mut state = self.state();
        state.calls.calendar_fetches += 1;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|event| window.contains(event))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.start);
        Ok(events)
    }

    async fn fetch_attendance_table(&self) -> WatcherResult<Vec<AttendanceRow>> {
        let mut state = self.state();
        state.calls.attendance_fetches += 1;
        Ok(state.attendance.clone())
    }

    async fn fetch_roll_call_page(&self, path: &str) -> WatcherResult<RollCallStatus> {
        let mut state = self.state();
        state.calls.roll_call_fetches += 1;
        if state.failing_roll_calls > 0 {
            state.failing_roll_calls -= 1;
            return Err(WatcherError::parse("simulated roll-call page failure"));
        }
        if state.stale_roll_calls > 0 {
            state.stale_roll_calls -= 1;
            state.authenticated = false;
        }
        if !state.authenticated {
            return Ok(RollCallStatus {
                session_expired: true,
                ..Default::default()
            });
        }
        Ok(state.roll_calls.get(path).cloned().unwrap_or_default())
    }
}
