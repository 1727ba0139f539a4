use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::{
    channel::{DEFAULT_POLL_INTERVAL, MAX_RECEIVE_WAIT, ReceiveOptions},
    lease::LeaseDurations,
    notify::DEFAULT_WEBHOOK_API_BASE,
    provider::DEFAULT_CHECKIP_URL,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{name} is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error(
        "heartbeat interval ({interval:?}) must be shorter than the heartbeat lease ({lease:?})"
    )]
    HeartbeatTooSlow { interval: Duration, lease: Duration },
    #[error("instance id cannot be obtained from parameter {key}")]
    MissingInstanceId { key: String },
    #[error("resolve parameter {key}: {reason}")]
    Parameter { key: String, reason: String },
}

/// Process configuration shared by the control and agent binaries.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub param_root: PathBuf,
    pub param_path: String,
    pub instance_id_override: Option<String>,
    pub leases: LeaseDurations,
    pub heartbeat_interval: Duration,
    pub receive: ReceiveOptions,
    pub receive_backoff: Duration,
    pub queue_poll_interval: Duration,
    pub webhook_api_base: String,
    pub start_hook_url: Option<String>,
    pub checkip_url: String,
    pub followup_marker: Option<PathBuf>,
    pub listen_addr: SocketAddr,
    pub http_timeout: Duration,
    /// Pause before a deferred command's first follow-up, so the platform
    /// has recorded the deferred response before the webhook is hit.
    pub reply_delay: Duration,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<Duration, ConfigError> {
    millis_or_secs(get, name, default, min, max).map(Duration::from_secs)
}

fn millis(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<Duration, ConfigError> {
    millis_or_secs(get, name, default, min, max).map(Duration::from_millis)
}

fn millis_or_secs(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    match non_empty(get(name)) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(|v| v.clamp(min, max))
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = non_empty(get("DATABASE_URL")).ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let leases = LeaseDurations {
            start_lease: secs(&get, "SPINUP_START_LEASE_SECS", 300, 30, 3600)?,
            heartbeat_lease: secs(&get, "SPINUP_HEARTBEAT_LEASE_SECS", 240, 30, 3600)?,
        };
        let heartbeat_interval = secs(&get, "SPINUP_HEARTBEAT_INTERVAL_SECS", 120, 5, 3600)?;

        let receive = ReceiveOptions {
            max_messages: 1,
            wait: secs(
                &get,
                "SPINUP_RECEIVE_WAIT_SECS",
                MAX_RECEIVE_WAIT.as_secs(),
                0,
                MAX_RECEIVE_WAIT.as_secs(),
            )?,
            visibility: secs(&get, "SPINUP_VISIBILITY_SECS", 30, 1, 12 * 3600)?,
        };

        let listen_raw = non_empty(get("SPINUP_LISTEN_ADDR")).unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let listen_addr = listen_raw
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid {
                name: "SPINUP_LISTEN_ADDR",
                value: listen_raw.clone(),
            })?;

        // Unset means the default path; set-but-empty disables the marker.
        let followup_marker = match get("SPINUP_FOLLOWUP_MARKER") {
            None => Some(PathBuf::from("/tmp/spinup_followup.json")),
            Some(v) => non_empty(Some(v)).map(PathBuf::from),
        };

        let settings = Self {
            database_url,
            param_root: non_empty(get("SPINUP_PARAM_ROOT"))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/etc/spinup/params")),
            param_path: non_empty(get("SPINUP_PARAM_PATH")).unwrap_or_else(|| "/spinup".to_string()),
            instance_id_override: non_empty(get("SPINUP_INSTANCE_ID")),
            leases,
            heartbeat_interval,
            receive,
            receive_backoff: secs(&get, "SPINUP_RECEIVE_BACKOFF_SECS", 5, 1, 300)?,
            queue_poll_interval: millis(
                &get,
                "SPINUP_QUEUE_POLL_MS",
                DEFAULT_POLL_INTERVAL.as_millis() as u64,
                50,
                10_000,
            )?,
            webhook_api_base: non_empty(get("SPINUP_WEBHOOK_API_BASE"))
                .unwrap_or_else(|| DEFAULT_WEBHOOK_API_BASE.to_string()),
            start_hook_url: non_empty(get("SPINUP_START_HOOK_URL")),
            checkip_url: non_empty(get("SPINUP_CHECKIP_URL"))
                .unwrap_or_else(|| DEFAULT_CHECKIP_URL.to_string()),
            followup_marker,
            listen_addr,
            http_timeout: millis(&get, "SPINUP_HTTP_TIMEOUT_MS", 30_000, 1000, 10 * 60_000)?,
            reply_delay: millis(&get, "SPINUP_REPLY_DELAY_MS", 1000, 0, 10_000)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// The heartbeat must renew before the lease it grants runs out.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lease = self.leases.heartbeat_lease;
        if self.heartbeat_interval >= lease {
            return Err(ConfigError::HeartbeatTooSlow {
                interval: self.heartbeat_interval,
                lease,
            });
        }
        if self.heartbeat_interval > lease / 2 {
            tracing::warn!(
                interval = ?self.heartbeat_interval,
                lease = ?lease,
                "heartbeat interval exceeds half the lease; a delayed renewal may let the lease lapse"
            );
        }
        Ok(())
    }
}
