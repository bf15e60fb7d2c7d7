//! iCalendar feed parsing.
//!
//! Only the fields the watcher needs are read: SUMMARY, DESCRIPTION, DTSTART and DTEND.
//! Recurrence rules are not expanded; the portal publishes one VEVENT per class.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use ical::parser::ical::component::IcalEvent;
use ical::property::Property;
use shared::CalendarEvent;

use super::CalendarWindow;
use crate::error::{WatcherError, WatcherResult};

/// Parse a feed and keep the events overlapping `window`, ordered by start
pub fn parse_events(feed: &str, window: CalendarWindow) -> WatcherResult<Vec<CalendarEvent>> {
    let mut events = Vec::new();

    for calendar in ical::IcalParser::new(feed.as_bytes()) {
        let calendar =
            calendar.map_err(|e| WatcherError::parse(format!("invalid calendar feed: {:?}", e)))?;

        for raw in &calendar.events {
            match to_calendar_event(raw) {
                Some(event) if window.contains(&event) => events.push(event),
                Some(_) => {}
                None => tracing::debug!("Skipping calendar event without usable dates"),
            }
        }
    }

    events.sort_by_key(|event| event.start);
    Ok(events)
}

fn to_calendar_event(event: &IcalEvent) -> Option<CalendarEvent> {
    let start = property(event, "DTSTART").and_then(parse_date_time)?;
    let end = property(event, "DTEND")
        .and_then(parse_date_time)
        .unwrap_or(start);

    Some(CalendarEvent {
        summary: text_value(event, "SUMMARY"),
        description: text_value(event, "DESCRIPTION"),
        start,
        end,
    })
}

fn property<'a>(event: &'a IcalEvent, name: &str) -> Option<&'a Property> {
    event
        .properties
        .iter()
        .find(|prop| prop.name.eq_ignore_ascii_case(name))
}

fn text_value(event: &IcalEvent, name: &str) -> String {
    property(event, name)
        .and_then(|prop| prop.value.as_deref())
        .map(unescape_text)
        .unwrap_or_default()
}

fn param<'a>(prop: &'a Property, name: &str) -> Option<&'a str> {
    prop.params
        .as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

/// DTSTART/DTEND in UTC, floating local time, TZID-qualified local time or date-only form
fn parse_date_time(prop: &Property) -> Option<DateTime<Utc>> {
    let value = prop.value.as_deref()?.trim();

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(Utc.from_utc_datetime(&naive));
    }

    let naive = match NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        Ok(naive) => naive,
        Err(_) => NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()?
            .and_hms_opt(0, 0, 0)?,
    };

    match param(prop, "TZID").and_then(|tzid| tzid.parse::<Tz>().ok()) {
        Some(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//portal//EN\r
BEGIN:VEVENT\r
UID:2\r
SUMMARY:Reseaux\r
DESCRIPTION:https://zoom/y\r
DTSTART:20261019T130000Z\r
DTEND:20261019T150000Z\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:1\r
SUMMARY:Algo\\, avance\r
DESCRIPTION: https://zoom/x\r
DTSTART;TZID=Europe/Paris:20261019T100000\r
DTEND;TZID=Europe/Paris:20261019T120000\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:3\r
SUMMARY:Demain\r
DTSTART:20261020T080000Z\r
DTEND:20261020T100000Z\r
END:VEVENT\r
END:VCALENDAR\r
";

    fn window() -> CalendarWindow {
        CalendarWindow {
            start: Utc.with_ymd_and_hms(2026, 10, 19, 6, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 10, 19, 21, 59, 59).unwrap(),
        }
    }

    #[test]
    fn test_events_filtered_and_sorted() {
        let events = parse_events(FEED, window()).unwrap();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].summary, "Algo, avance");
        assert_eq!(events[0].description.trim(), "https://zoom/x");
        // 10:00 Paris summer time
        assert_eq!(events[0].start, Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap());
        assert_eq!(events[0].end, Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap());

        assert_eq!(events[1].summary, "Reseaux");
        assert_eq!(events[1].start, Utc.with_ymd_and_hms(2026, 10, 19, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_events_already_over_are_dropped() {
        let late = CalendarWindow {
            start: Utc.with_ymd_and_hms(2026, 10, 19, 16, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 10, 19, 21, 59, 59).unwrap(),
        };
        assert!(parse_events(FEED, late).unwrap().is_empty());
    }

    #[test]
    fn test_empty_feed() {
        let feed = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n";
        assert!(parse_events(feed, window()).unwrap().is_empty());
    }

    #[test]
    fn test_unescape_text() {
        assert_eq!(unescape_text(r"a\, b\; c\nd\\e"), "a, b; c\nd\\e");
        assert_eq!(unescape_text("trailing\\"), "trailing\\");
    }
}
