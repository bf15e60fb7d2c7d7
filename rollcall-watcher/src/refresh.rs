//! Calendar refresh cycle and startup sequence.

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use std::sync::Arc;

use crate::context::ServiceContext;
use crate::error::WatcherResult;
use crate::lessons::Registration;
use crate::notify::STARTUP_TITLE;
use crate::polling::PollingController;
use crate::scheduler::{Task, TaskId};

/// Pull today's remaining events and start tracking the ones not seen yet.
///
/// Returns the number of newly registered lessons.
pub async fn refresh_lessons(ctx: &Arc<ServiceContext>) -> WatcherResult<usize> {
    tracing::info!("Updating calendar");
    let events = ctx.calendar.fetch_today_events(Utc::now()).await?;
    let controller = PollingController::new(ctx.clone());

    let mut added = 0;
    for event in &events {
        if let Registration::New(lesson) = ctx.registry.register(event) {
            controller.track(lesson).await?;
            added += 1;
        }
    }

    tracing::info!(
        "Calendar updated: {} events today, {} new",
        events.len(),
        added
    );
    Ok(added)
}

/// Scheduled refresh: a rejected password halts the watcher, anything else skips this cycle
pub async fn run_refresh(ctx: Arc<ServiceContext>) -> anyhow::Result<()> {
    match refresh_lessons(&ctx).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_terminal() => {
            let message = e.to_string();
            ctx.halt(&message).await;
            Err(e.into())
        }
        Err(e) => {
            tracing::warn!("Calendar refresh skipped: {}", e);
            Ok(())
        }
    }
}

/// Next instant strictly after `now` whose local time of day is `at`
pub fn next_occurrence(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.with_timezone(&Local).date_naive();

    [Some(today), today.checked_add_days(Days::new(1)), today.checked_add_days(Days::new(2))]
        .into_iter()
        .flatten()
        .filter_map(|date| Local.from_local_datetime(&date.and_time(at)).earliest())
        .map(|local| local.with_timezone(&Utc))
        .find(|candidate| *candidate > now)
        .unwrap_or_else(|| now + chrono::Duration::days(1))
}

/// One refresh per configured time of day.
///
/// Each run schedules the following one from the wall clock, so the refresh stays on its local
/// time across daylight saving changes.
pub fn schedule_daily_refreshes(
    ctx: &Arc<ServiceContext>,
    now: DateTime<Utc>,
) -> WatcherResult<Vec<TaskId>> {
    ctx.config
        .refresh_times
        .iter()
        .map(|at| schedule_refresh_at(ctx, *at, next_occurrence(now, *at)))
        .collect()
}

fn schedule_refresh_at(
    ctx: &Arc<ServiceContext>,
    at: NaiveTime,
    due: DateTime<Utc>,
) -> WatcherResult<TaskId> {
    let task_ctx = ctx.clone();
    let id = ctx.scheduler.add(Task::once(due, move || {
        let ctx = task_ctx.clone();
        async move {
            run_refresh(ctx.clone()).await?;
            if !ctx.is_halted() {
                // strictly after `due`, the timer may fire early on the wall clock
                let next = next_occurrence(Utc::now().max(due), at);
                schedule_refresh_at(&ctx, at, next)?;
            }
            Ok::<_, anyhow::Error>(())
        }
    }))?;

    tracing::info!(
        "Calendar refresh at {} scheduled for {}",
        at.format("%H:%M"),
        due.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    Ok(id)
}

/// Startup notification, first refresh, then the daily refreshes
pub async fn bootstrap(ctx: &Arc<ServiceContext>) -> anyhow::Result<()> {
    ctx.notify(STARTUP_TITLE, "RollcallBot est lancé, bon ski :)").await;

    run_refresh(ctx.clone()).await?;
    if ctx.is_halted() {
        return Ok(());
    }

    schedule_daily_refreshes(ctx, Utc::now())?;
    Ok(())
}
