use clap::Parser;

use crate::error::ForwarderError;

/// Flat CLI/environment configuration surface. Values are resolved from
/// CLI flags first, then environment variables, per clap's own precedence.
#[derive(Debug, Parser)]
#[command(name = "deepfry-forwarder", about = "Forwards events from a source relay to deepfry")]
pub struct RawConfig {
    #[arg(long, env = "SOURCE_RELAY_URL")]
    pub source_relay_url: String,

    #[arg(long, env = "DEEPFRY_RELAY_URL")]
    pub deepfry_relay_url: String,

    /// Hex or bech32 `nsec` secret key.
    #[arg(long, env = "NOSTR_SECRET_KEY")]
    pub nostr_secret_key: String,

    #[arg(long, env = "SYNC_WINDOW_SECONDS", default_value_t = 5)]
    pub sync_window_seconds: i64,

    #[arg(long, env = "SYNC_MAX_BATCH", default_value_t = 1000)]
    pub sync_max_batch: u32,

    #[arg(long, env = "SYNC_MAX_CATCHUP_LAG_SECONDS", default_value_t = 10)]
    pub sync_max_catchup_lag_seconds: i64,

    /// RFC3339 timestamp. Empty means "resolve from the last checkpoint".
    #[arg(long, env = "SYNC_START_TIME", default_value = "")]
    pub sync_start_time: String,

    #[arg(long, env = "REALTIME_TOLERANCE_SECONDS", default_value_t = 5)]
    pub realtime_tolerance_seconds: i64,

    #[arg(long, env = "TIMEOUT_PUBLISH_SECONDS", default_value_t = 10)]
    pub timeout_publish_seconds: u64,

    #[arg(long, env = "TIMEOUT_SUBSCRIBE_SECONDS", default_value_t = 10)]
    pub timeout_subscribe_seconds: u64,

    /// Disables the TUI. The forwarding core is unaffected either way.
    #[arg(long, env = "QUIET_MODE", default_value_t = false)]
    pub quiet_mode: bool,

    #[arg(long, env = "STATUS_HTTP_BIND", default_value = "127.0.0.1:8787")]
    pub status_http_bind: String,
}

/// Validated configuration, ready to hand to the orchestrator.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub source_relay_url: String,
    pub deepfry_relay_url: String,
    pub nostr_secret_key: String,
    pub sync_window_seconds: i64,
    pub sync_max_batch: u32,
    pub sync_max_catchup_lag_seconds: i64,
    pub sync_start_time: Option<i64>,
    pub realtime_tolerance_seconds: i64,
    pub timeout_publish_seconds: u64,
    pub timeout_subscribe_seconds: u64,
    pub quiet_mode: bool,
    pub status_http_bind: String,
}

impl ForwarderConfig {
    pub fn load() -> Result<Self, ForwarderError> {
        let raw = RawConfig::parse();
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawConfig) -> Result<Self, ForwarderError> {
        if raw.source_relay_url.trim().is_empty() {
            return Err(ForwarderError::ConfigInvalid(
                "source_relay_url is required".into(),
            ));
        }
        if raw.deepfry_relay_url.trim().is_empty() {
            return Err(ForwarderError::ConfigInvalid(
                "deepfry_relay_url is required".into(),
            ));
        }
        if raw.nostr_secret_key.trim().is_empty() {
            return Err(ForwarderError::ConfigInvalid(
                "nostr_secret_key is required".into(),
            ));
        }
        if raw.sync_window_seconds < 1 {
            return Err(ForwarderError::ConfigInvalid(
                "sync_window_seconds must be >= 1".into(),
            ));
        }
        if raw.sync_max_batch < 1 {
            return Err(ForwarderError::ConfigInvalid(
                "sync_max_batch must be >= 1".into(),
            ));
        }
        if raw.sync_max_catchup_lag_seconds < 0 {
            return Err(ForwarderError::ConfigInvalid(
                "sync_max_catchup_lag_seconds must be >= 0".into(),
            ));
        }

        let sync_start_time = if raw.sync_start_time.trim().is_empty() {
            None
        } else {
            Some(parse_rfc3339_to_unix(&raw.sync_start_time)?)
        };

        Ok(ForwarderConfig {
            source_relay_url: raw.source_relay_url,
            deepfry_relay_url: raw.deepfry_relay_url,
            nostr_secret_key: raw.nostr_secret_key,
            sync_window_seconds: raw.sync_window_seconds,
            sync_max_batch: raw.sync_max_batch,
            sync_max_catchup_lag_seconds: raw.sync_max_catchup_lag_seconds,
            sync_start_time,
            realtime_tolerance_seconds: raw.realtime_tolerance_seconds,
            timeout_publish_seconds: raw.timeout_publish_seconds,
            timeout_subscribe_seconds: raw.timeout_subscribe_seconds,
            quiet_mode: raw.quiet_mode,
            status_http_bind: raw.status_http_bind,
        })
    }
}

/// Parses a subset of RFC3339 (`YYYY-MM-DDTHH:MM:SSZ`) into unix seconds,
/// without pulling in a date/time crate for a single config field.
fn parse_rfc3339_to_unix(s: &str) -> Result<i64, ForwarderError> {
    let bad = || ForwarderError::ConfigInvalid(format!("invalid RFC3339 start time: {s}"));
    let s = s.strip_suffix('Z').ok_or_else(bad)?;
    let (date, time) = s.split_once('T').ok_or_else(bad)?;
    let mut date_parts = date.split('-');
    let year: i64 = date_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let month: i64 = date_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let day: i64 = date_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let mut time_parts = time.split(':');
    let hour: i64 = time_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let minute: i64 = time_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let second: i64 = time_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(bad());
    }

    let days_since_epoch = days_from_civil(year, month, day);
    Ok(days_since_epoch * 86_400 + hour * 3600 + minute * 60 + second)
}

/// Howard Hinnant's civil-from-days algorithm, inverted: days since the
/// unix epoch for a given proleptic-Gregorian `(y, m, d)`.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
