use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use shared::CalendarEvent;
use std::sync::Arc;

use crate::error::{WatcherError, WatcherResult};
use crate::portal::{CalendarWindow, Portal};
use crate::session::SessionManager;

/// Reads today's remaining classes from the portal's calendar feed
pub struct CalendarFetcher {
    portal: Arc<dyn Portal>,
    session: Arc<SessionManager>,
}

impl CalendarFetcher {
    pub fn new(portal: Arc<dyn Portal>, session: Arc<SessionManager>) -> Self {
        Self { portal, session }
    }

    /// Events between `now` and the end of the local day, ordered by start
    pub async fn fetch_today_events(&self, now: DateTime<Utc>) -> WatcherResult<Vec<CalendarEvent>> {
        self.session.ensure_valid().await?;

        let link = self
            .portal
            .fetch_calendar_link()
            .await?
            .ok_or_else(|| WatcherError::parse("calendar link not found on the home page"))?;
        tracing::debug!("Calendar feed: {}", link);

        let events = self
            .portal
            .fetch_calendar_feed(&link, today_window(now))
            .await?;
        tracing::debug!("Calendar feed lists {} events for today", events.len());
        Ok(events)
    }
}

/// From `now` until 23:59:59 local time
pub fn today_window(now: DateTime<Utc>) -> CalendarWindow {
    let local_date = now.with_timezone(&Local).date_naive();
    let end_of_day = local_date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN));
    let end = Local
        .from_local_datetime(&end_of_day)
        .latest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    CalendarWindow { start: now, end }
}
