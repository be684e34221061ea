use gpu_race_common::Offer;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8004";

/// Race tuning. `Default` is the dedicated provisioning page variant;
/// [`RaceConfig::dashboard`] is the slower variant embedded in the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceConfig {
    /// Offers raced in parallel per round.
    pub max_candidates: usize,
    pub max_rounds: u32,
    pub poll_interval: Duration,
    /// Wall-clock budget of one round (creation + polling).
    pub timeout: Duration,
    /// Stagger between create dispatches.
    pub create_delay: Duration,
    /// Upper bound for the disk requested on create.
    pub disk_size_gb: f64,
    /// Bound on every single provider call.
    pub request_timeout: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            max_rounds: 3,
            poll_interval: Duration::from_millis(2000),
            timeout: Duration::from_millis(15_000),
            create_delay: Duration::from_millis(300),
            disk_size_gb: 50.0,
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl RaceConfig {
    pub fn dashboard() -> Self {
        Self {
            poll_interval: Duration::from_millis(3000),
            timeout: Duration::from_secs(5 * 60),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup (env in production).
    /// Invalid or zero values keep the preset value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base = match lookup("RACE_PRESET")
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("dashboard") => Self::dashboard(),
            Some("dedicated") | Some("") | None => Self::default(),
            Some(other) => {
                warn!("⚠️ [config] Unknown RACE_PRESET={}, using dedicated", other);
                Self::default()
            }
        };

        Self {
            max_candidates: positive(&lookup, "RACE_MAX_CANDIDATES").unwrap_or(base.max_candidates),
            max_rounds: positive(&lookup, "RACE_MAX_ROUNDS").unwrap_or(base.max_rounds),
            poll_interval: millis(&lookup, "RACE_POLL_INTERVAL_MS").unwrap_or(base.poll_interval),
            timeout: millis(&lookup, "RACE_TIMEOUT_MS").unwrap_or(base.timeout),
            create_delay: create_delay(&lookup).unwrap_or(base.create_delay),
            disk_size_gb: positive(&lookup, "RACE_DISK_SIZE_GB").unwrap_or(base.disk_size_gb),
            request_timeout: millis(&lookup, "RACE_REQUEST_TIMEOUT_MS")
                .unwrap_or(base.request_timeout),
        }
    }

    /// Disk requested for `offer`: never more than the offer advertises.
    pub fn disk_size_for(&self, offer: &Offer) -> f64 {
        match offer.disk_space_gb {
            Some(available) if available > 0.0 => self.disk_size_gb.min(available),
            _ => self.disk_size_gb,
        }
    }
}

pub fn listen_addr() -> String {
    env::var("RACE_LISTEN_ADDR")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            warn!("⚠️ [config] Ignoring {}={:?} (expected a positive number)", key, raw);
            None
        }
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    positive::<u64>(lookup, key).map(Duration::from_millis)
}

// Zero is a valid stagger (dispatch everything at once).
fn create_delay(lookup: &impl Fn(&str) -> Option<String>) -> Option<Duration> {
    let raw = lookup("RACE_CREATE_DELAY_MS")?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            warn!("⚠️ [config] Ignoring RACE_CREATE_DELAY_MS={:?}", raw);
            None
        }
    }
}
