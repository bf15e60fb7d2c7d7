//! Named accessors over portal markup.
//!
//! The portal's pages are located with deep structural selectors that break whenever the
//! markup changes upstream. They are kept here, one function per question the watcher asks, so
//! the rest of the crate never sees a selector.

use scraper::{ElementRef, Html, Selector};

use super::{AttendanceRow, RollCallStatus};
use crate::error::{WatcherError, WatcherResult};

const EXPIRED_MARKER: &str = "#formWrapper > div.forget-password";
const CALENDAR_LINK: &str = "#main > div:nth-child(3) > div > div > div > header > div > a";
const ASSERTION_INPUT: &str = "input[name=SAMLResponse]";
const PRESENCE_BODY: &str = "#body_presence > div";
const SET_PRESENCE: &str = "#set-presence";
const ALREADY_PRESENT_TEXT: &str = "Vous avez été noté présent";

fn selector(css: &str) -> WatcherResult<Selector> {
    Selector::parse(css).map_err(|e| WatcherError::parse(format!("invalid selector {}: {:?}", css, e)))
}

/// Pull the redirect path out of the identity-assertion payload.
///
/// The payload wraps the path in a quoted string (a script assignment or a JSON value). The
/// first quoted value starting with `/` wins; JSON-escaped slashes are unescaped.
pub fn extract_redirect_path(payload: &str) -> Option<String> {
    let mut rest = payload;
    while let Some(open) = rest.find(['"', '\'']) {
        let quote = rest[open..].chars().next()?;
        let body = &rest[open + 1..];
        let close = find_closing_quote(body, quote)?;
        let candidate = body[..close].replace("\\/", "/");
        let candidate = candidate.trim();
        if candidate.starts_with('/') {
            return Some(candidate.to_string());
        }
        rest = &body[close + 1..];
    }

    let bare = payload.trim();
    (bare.starts_with('/') && !bare.contains(char::is_whitespace)).then(|| bare.to_string())
}

fn find_closing_quote(body: &str, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (idx, c) in body.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            c if c == quote && !escaped => return Some(idx),
            _ => escaped = false,
        }
    }
    None
}

/// Whether the page is the login form shown to unauthenticated visitors
pub fn has_expired_marker(html: &str) -> WatcherResult<bool> {
    let doc = Html::parse_document(html);
    Ok(doc.select(&selector(EXPIRED_MARKER)?).next().is_some())
}

/// Calendar feed link from the home page header
pub fn calendar_link(html: &str) -> WatcherResult<Option<String>> {
    let doc = Html::parse_document(html);
    let link = doc
        .select(&selector(CALENDAR_LINK)?)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty());
    Ok(link)
}

/// Signed assertion from the identity provider's auto-submit form, if any
pub fn assertion_token(html: &str) -> WatcherResult<Option<String>> {
    let doc = Html::parse_document(html);
    let token = doc
        .select(&selector(ASSERTION_INPUT)?)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    Ok(token)
}

/// Rows of every table on the attendance page, each cell reduced to its link target
pub fn attendance_rows(html: &str) -> WatcherResult<Vec<AttendanceRow>> {
    let doc = Html::parse_document(html);
    let tables = selector("table")?;
    let rows = selector("tr")?;
    let cells = selector("td")?;
    let links = selector("a")?;

    let mut result = Vec::new();
    for table in doc.select(&tables) {
        for row in table.select(&rows) {
            let row: AttendanceRow = row
                .select(&cells)
                .map(|cell| first_href(cell, &links))
                .collect();
            result.push(row);
        }
    }
    Ok(result)
}

fn first_href(cell: ElementRef<'_>, links: &Selector) -> String {
    cell.select(links)
        .next()
        .and_then(|a| a.value().attr("href"))
        .unwrap_or_default()
        .to_string()
}

/// Presence state of a roll-call page
pub fn roll_call_status(html: &str) -> WatcherResult<RollCallStatus> {
    let doc = Html::parse_document(html);

    let already_present = doc
        .select(&selector(PRESENCE_BODY)?)
        .any(|div| div.text().collect::<String>().contains(ALREADY_PRESENT_TEXT));

    let open_marker = doc
        .select(&selector(SET_PRESENCE)?)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let session_expired = doc.select(&selector(EXPIRED_MARKER)?).next().is_some();

    Ok(RollCallStatus {
        already_present,
        open_marker,
        session_expired,
    })
}
