//! Time-driven task scheduler.
//!
//! Each scheduled task runs on its own tokio task, so a slow tick of one task never delays
//! another. A repeating task awaits its action before waiting for the next tick, which keeps
//! ticks of the same task strictly serialized. Errors and panics raised by an action are logged
//! and the task keeps its schedule.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::error::SchedulerFault;

pub type TaskId = String;

type TaskAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A unit of scheduled work
pub struct Task {
    start_after: DateTime<Utc>,
    interval: Option<Duration>,
    action: TaskAction,
}

impl Task {
    /// Run `action` once at or after `start_after`
    pub fn once<F, Fut>(start_after: DateTime<Utc>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            start_after,
            interval: None,
            action: Arc::new(move || action().boxed()),
        }
    }

    /// Run `action` at `start_after`, then every `interval` until cancelled
    pub fn repeating<F, Fut>(start_after: DateTime<Utc>, interval: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            start_after,
            interval: Some(interval.max(Duration::from_millis(1))),
            action: Arc::new(move || action().boxed()),
        }
    }

    pub fn is_repeating(&self) -> bool {
        self.interval.is_some()
    }
}

struct ScheduledTask {
    serial: u64,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerInner {
    tasks: Mutex<HashMap<TaskId, ScheduledTask>>,
    next_serial: AtomicU64,
    stopped: AtomicBool,
}

impl SchedulerInner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop a finished one-shot task, unless its id was reused meanwhile
    fn remove_finished(&self, id: &str, serial: u64) {
        let mut tasks = self.tasks();
        if tasks.get(id).is_some_and(|task| task.serial == serial) {
            tasks.remove(id);
        }
    }
}

/// Cheaply cloneable handle to the task table
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh identifier for `add_with_id`, for tasks that need to know their own id
    pub fn new_task_id() -> TaskId {
        Uuid::new_v4().to_string()
    }

    /// Schedule a task under a generated id
    pub fn add(&self, task: Task) -> Result<TaskId, SchedulerFault> {
        let id = Self::new_task_id();
        self.add_with_id(&id, task)?;
        Ok(id)
    }

    /// Schedule a task under `id`, which must not be in use
    pub fn add_with_id(&self, id: &str, task: Task) -> Result<(), SchedulerFault> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerFault::Stopped);
        }

        let mut tasks = self.inner.tasks();
        if tasks.contains_key(id) {
            return Err(SchedulerFault::DuplicateId(id.to_string()));
        }

        tracing::debug!(
            "Scheduling {} task {} from {}",
            if task.is_repeating() { "repeating" } else { "one-shot" },
            id,
            task.start_after
        );
        let serial = self.inner.next_serial.fetch_add(1, Ordering::SeqCst);
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(run_task(
            self.inner.clone(),
            id.to_string(),
            serial,
            task,
            cancelled,
        ));

        tasks.insert(
            id.to_string(),
            ScheduledTask {
                serial,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    /// Cancel a task. A tick already running finishes; no further tick starts.
    pub fn cancel(&self, id: &str) -> Result<(), SchedulerFault> {
        let task = self
            .inner
            .tasks()
            .remove(id)
            .ok_or_else(|| SchedulerFault::UnknownId(id.to_string()))?;
        let _ = task.cancel.send(true);
        tracing::debug!("Task {} cancelled", id);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.tasks().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop dispatching; running ticks are abandoned
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let tasks: Vec<_> = self.inner.tasks().drain().collect();
        for (_, task) in tasks {
            task.handle.abort();
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn run_task(
    inner: Arc<SchedulerInner>,
    id: TaskId,
    serial: u64,
    task: Task,
    mut cancelled: watch::Receiver<bool>,
) {
    let delay = (task.start_after - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    let start = Instant::now() + delay;

    let Some(period) = task.interval else {
        tokio::select! {
            _ = time::sleep_until(start) => {}
            _ = cancelled.changed() => return,
        }
        run_isolated(&id, &task.action).await;
        inner.remove_finished(&id, serial);
        return;
    };

    let mut ticker = time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancelled.changed() => break,
        }
        if *cancelled.borrow() {
            break;
        }
        run_isolated(&id, &task.action).await;
    }
    tracing::trace!("Task {} finished", id);
}

async fn run_isolated(id: &str, action: &TaskAction) {
    match AssertUnwindSafe(action()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Task {} failed: {:#}", id, e),
        Err(_) => tracing::error!("Task {} panicked", id),
    }
}
