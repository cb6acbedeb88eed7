use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::ReviewType;

/// Runtime configuration. All values read from environment variables with
/// defaults suitable for a single-host deployment.
///
/// Environment variables:
/// - `COURIER_DATA_DIR` — data root (default: `~/.agent-courier`, falling
///   back to `./data` when no home directory is available)
/// - `SNOOZE_SWEEP_SECS` — snoozed-message wake sweep period (default: 60)
/// - `RETENTION_DAYS_TRASH` — days before trash rows are purged (default: 30)
/// - `POLL_MAX_WAIT_SECS` — long-poll ceiling (default: 570 = 9m30s)
/// - `HUB_MAX_SUBSCRIBERS` — waiting pollers per recipient (default: 16)
/// - `QUEUE_TTL_SECS` — client queue operation TTL (default: 7 days)
/// - `QUEUE_BASE_BACKOFF_MS` / `QUEUE_CAP_BACKOFF_MS` — client reconnect
///   backoff window (defaults: 500 / 30000)
/// - `REVIEW_TIMEOUT_{FULL,SECURITY,PERFORMANCE,ARCHITECTURE}_SECS` —
///   per-type reviewer budgets (defaults: 600/900/600/900)
/// - `REVIEWER_CMD` — reviewer executable the sub-workers drive
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub snooze_sweep_interval: Duration,
    pub retention_days_trash: i64,
    pub poll_max_wait: Duration,
    pub hub_max_subscribers: usize,
    pub queue_ttl: Duration,
    pub queue_base_backoff: Duration,
    pub queue_cap_backoff: Duration,
    pub review_timeout_full: Duration,
    pub review_timeout_security: Duration,
    pub review_timeout_performance: Duration,
    pub review_timeout_architecture: Duration,
    pub reviewer_cmd: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = env::var("HOME")
            .map(|h| PathBuf::from(h).join(".agent-courier"))
            .unwrap_or_else(|_| PathBuf::from("data"));
        Self {
            data_dir,
            snooze_sweep_interval: Duration::from_secs(60),
            retention_days_trash: 30,
            poll_max_wait: Duration::from_secs(570),
            hub_max_subscribers: 16,
            queue_ttl: Duration::from_secs(7 * 24 * 3600),
            queue_base_backoff: Duration::from_millis(500),
            queue_cap_backoff: Duration::from_millis(30_000),
            review_timeout_full: Duration::from_secs(600),
            review_timeout_security: Duration::from_secs(900),
            review_timeout_performance: Duration::from_secs(600),
            review_timeout_architecture: Duration::from_secs(900),
            reviewer_cmd: "reviewer".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("COURIER_DATA_DIR")
            && !dir.trim().is_empty()
        {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_u64("SNOOZE_SWEEP_SECS") {
            config.snooze_sweep_interval = Duration::from_secs(secs);
        }
        if let Some(days) = env_u64("RETENTION_DAYS_TRASH") {
            config.retention_days_trash = days as i64;
        }
        if let Some(secs) = env_u64("POLL_MAX_WAIT_SECS") {
            config.poll_max_wait = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("HUB_MAX_SUBSCRIBERS") {
            config.hub_max_subscribers = n as usize;
        }
        if let Some(secs) = env_u64("QUEUE_TTL_SECS") {
            config.queue_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("QUEUE_BASE_BACKOFF_MS") {
            config.queue_base_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("QUEUE_CAP_BACKOFF_MS") {
            config.queue_cap_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("REVIEW_TIMEOUT_FULL_SECS") {
            config.review_timeout_full = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("REVIEW_TIMEOUT_SECURITY_SECS") {
            config.review_timeout_security = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("REVIEW_TIMEOUT_PERFORMANCE_SECS") {
            config.review_timeout_performance = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("REVIEW_TIMEOUT_ARCHITECTURE_SECS") {
            config.review_timeout_architecture = Duration::from_secs(secs);
        }
        if let Ok(cmd) = env::var("REVIEWER_CMD")
            && !cmd.trim().is_empty()
        {
            config.reviewer_cmd = cmd;
        }

        config
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("courier.db")
    }

    pub fn identities_dir(&self) -> PathBuf {
        self.data_dir.join("identities")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Scratch configuration roots handed to reviewer sub-workers so they
    /// never see the operator's own hooks or session state.
    pub fn review_home_dir(&self) -> PathBuf {
        self.data_dir.join("review-home")
    }

    /// Reviewer budget for a review type. Heavier review kinds get the
    /// larger window.
    pub fn review_timeout(&self, review_type: ReviewType) -> Duration {
        match review_type {
            ReviewType::Full => self.review_timeout_full,
            ReviewType::Security => self.review_timeout_security,
            ReviewType::Performance => self.review_timeout_performance,
            ReviewType::Architecture => self.review_timeout_architecture,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    if let Ok(val) = env::var(name)
        && let Ok(n) = val.parse::<u64>()
    {
        return Some(n);
    }
    None
}
