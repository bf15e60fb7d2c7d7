use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.leonard-de-vinci.net";

#[derive(Parser, Debug, Clone)]
#[command(name = "rollcall-watcher")]
#[command(about = "Watches the portal for open roll-calls and pushes a notification")]
pub struct Cli {
    /// Portal login (also sent to the identity provider)
    #[arg(long, env = "LOGIN")]
    pub login: String,

    /// Portal password
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    pub password: String,

    /// JSON array of notification recipients (device tokens)
    #[arg(long, env = "RECIPIENTS", default_value = "[]")]
    pub recipients: String,

    /// Enable debug logging
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Portal base URL
    #[arg(long, env = "PORTAL_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Push webhook; notifications are only logged when unset
    #[arg(long, env = "NOTIFY_URL")]
    pub notify_url: Option<String>,

    /// Seconds between two roll-call checks of the same lesson
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 120)]
    pub poll_interval_secs: u64,

    /// Comma-separated times of day (HH:MM) at which the calendar is refreshed
    #[arg(long, env = "REFRESH_TIMES", default_value = "05:00,12:00")]
    pub refresh_times: String,

    /// Timeout for a single portal request
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,
}

/// Validated configuration, immutable for the process lifetime
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub login: String,
    pub password: String,
    pub recipients: Vec<String>,
    pub debug: bool,
    pub base_url: String,
    pub notify_url: Option<String>,
    pub poll_interval: Duration,
    pub refresh_times: Vec<NaiveTime>,
    pub http_timeout: Duration,
}

impl WatcherConfig {
    /// Load configuration from the command line and environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self> {
        let recipients: Vec<String> = serde_json::from_str(&cli.recipients)
            .context("RECIPIENTS must be a JSON array of strings")?;

        if cli.poll_interval_secs == 0 {
            bail!("POLL_INTERVAL_SECS must be greater than zero");
        }

        Ok(Self {
            login: cli.login,
            password: cli.password,
            recipients,
            debug: cli.debug,
            base_url: cli.base_url.trim_end_matches('/').to_string(),
            notify_url: cli.notify_url.filter(|url| !url.trim().is_empty()),
            poll_interval: Duration::from_secs(cli.poll_interval_secs),
            refresh_times: parse_refresh_times(&cli.refresh_times)?,
            http_timeout: Duration::from_secs(cli.http_timeout_secs),
        })
    }

    /// Configuration for tests and local runs against a fake portal
    pub fn example() -> Self {
        WatcherConfig {
            login: "student@example.com".to_string(),
            password: "secret".to_string(),
            recipients: vec!["device-token".to_string()],
            debug: false,
            base_url: DEFAULT_BASE_URL.to_string(),
            notify_url: None,
            poll_interval: Duration::from_secs(120),
            refresh_times: vec![
                NaiveTime::from_hms_opt(5, 0, 0).unwrap_or_default(),
                NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
            ],
            http_timeout: Duration::from_secs(30),
        }
    }
}

fn parse_refresh_times(raw: &str) -> Result<Vec<NaiveTime>> {
    let times = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .with_context(|| format!("invalid refresh time '{}', expected HH:MM", s))
        })
        .collect::<Result<Vec<_>>>()?;

    if times.is_empty() {
        bail!("REFRESH_TIMES must list at least one time of day");
    }
    Ok(times)
}
