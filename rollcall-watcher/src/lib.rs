//! Roll-call watcher: logs into the school portal, follows today's lessons and pushes a
//! notification as soon as a lesson's roll-call opens.

pub mod attendance;
pub mod calendar;
pub mod config;
pub mod context;
pub mod error;
pub mod lessons;
pub mod notify;
pub mod polling;
pub mod portal;
pub mod refresh;
pub mod scheduler;
pub mod session;

pub use config::WatcherConfig;
pub use context::ServiceContext;
pub use error::{WatcherError, WatcherResult};
