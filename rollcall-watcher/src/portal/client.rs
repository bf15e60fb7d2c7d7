//! reqwest implementation of the portal boundary.

use async_trait::async_trait;
use reqwest::Client;
use shared::CalendarEvent;
use std::time::Duration;

use super::{feed, markup, AttendanceRow, CalendarWindow, Portal, RollCallStatus};
use crate::error::WatcherResult;

const AJAX_PATH: &str = "/ajax.inc.php";
const ASSERTION_CONSUMER_PATH: &str = "/simplesaml/module.php/saml/sp/saml2-acs.php/alv-sp";
const ATTENDANCE_PATH: &str = "/student/presences/";

/// Client for the portal; every request shares the same cookie jar
pub struct PortalClient {
    http: Client,
    base_url: String,
}

impl PortalClient {
    pub fn new(base_url: &str, timeout: Duration) -> WatcherResult<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .user_agent(concat!("rollcall-watcher/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URLs pass through, portal paths are joined to the base URL
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn get_text(&self, path: &str) -> WatcherResult<String> {
        let url = self.url(path);
        tracing::trace!("GET {}", url);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> WatcherResult<String> {
        tracing::trace!("POST {}", url);
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Portal for PortalClient {
    async fn post_identity_assertion(&self, login: &str) -> WatcherResult<String> {
        self.post_form(
            &self.url(AJAX_PATH),
            &[("act", "ident_analyse"), ("login", login)],
        )
        .await
    }

    async fn follow_redirect(&self, path: &str) -> WatcherResult<String> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.url().to_string())
    }

    async fn post_credentials(
        &self,
        url: &str,
        login: &str,
        password: &str,
    ) -> WatcherResult<String> {
        let page = self
            .post_form(
                url,
                &[
                    ("UserName", login),
                    ("Password", password),
                    ("AuthMethod", "FormsAuthentication"),
                ],
            )
            .await?;
        Ok(markup::assertion_token(&page)?.unwrap_or_default())
    }

    async fn post_assertion(&self, token: &str, relay_state: &str) -> WatcherResult<()> {
        self.post_form(
            &self.url(ASSERTION_CONSUMER_PATH),
            &[("SAMLResponse", token), ("RelayState", relay_state)],
        )
        .await?;
        Ok(())
    }

    async fn fetch_home(&self) -> WatcherResult<bool> {
        let page = self.get_text("/").await?;
        markup::has_expired_marker(&page)
    }

    async fn fetch_calendar_link(&self) -> WatcherResult<Option<String>> {
        let page = self.get_text("/").await?;
        markup::calendar_link(&page)
    }

    async fn fetch_calendar_feed(
        &self,
        path: &str,
        window: CalendarWindow,
    ) -> WatcherResult<Vec<CalendarEvent>> {
        let feed = self.get_text(path).await?;
        feed::parse_events(&feed, window)
    }

    async fn fetch_attendance_table(&self) -> WatcherResult<Vec<AttendanceRow>> {
        let page = self.get_text(ATTENDANCE_PATH).await?;
        markup::attendance_rows(&page)
    }

    async fn fetch_roll_call_page(&self, path: &str) -> WatcherResult<RollCallStatus> {
        let page = self.get_text(path).await?;
        markup::roll_call_status(&page)
    }
}
