use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Default user agent sent with every playlist and segment request.
pub const DEFAULT_USER_AGENT: &str = concat!("hls-sync ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one source URL is required")]
    NoSource,

    #[error("invalid source URL `{url}`: {reason}")]
    InvalidSource { url: String, reason: String },

    #[error("unknown program timezone `{0}`")]
    InvalidTimezone(String),

    #[error("record.enabled and record.reindex must be set to enable the HTTP service")]
    HttpWithoutReindex,

    #[error("invalid listen address `{0}`, expected `tcp://HOST:PORT` or `unix://PATH`")]
    InvalidListen(String),

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}

/// Where a segment's program timestamp comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampMode {
    /// Local clock at the time the segment was first observed.
    Local,
    /// `#EXT-X-PROGRAM-DATE-TIME` of the segment.
    #[default]
    Program,
    /// Parsed out of the segment URI with `timestamp_format`.
    Segment,
}

/// Span covered by one index bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Hour,
    Minute,
}

impl Granularity {
    /// Truncates `ts` down to the start of its bucket.
    pub fn truncate(self, ts: NaiveDateTime) -> NaiveDateTime {
        let ts = ts.with_nanosecond(0).unwrap_or(ts);
        let ts = ts.with_second(0).unwrap_or(ts);
        match self {
            Self::Minute => ts,
            Self::Hour => ts.with_minute(0).unwrap_or(ts),
        }
    }

    pub fn step(self) -> TimeDelta {
        match self {
            Self::Hour => TimeDelta::hours(1),
            Self::Minute => TimeDelta::minutes(1),
        }
    }

    /// Maximum number of entries one bucket playlist holds.
    pub fn capacity(self) -> usize {
        match self {
            Self::Hour => 2048,
            Self::Minute => 128,
        }
    }

    /// Position of `ts` inside its bucket, counted in target-duration slots.
    pub fn slot(self, ts: NaiveDateTime, target_duration: u64) -> u64 {
        let elapsed = match self {
            Self::Hour => u64::from(ts.minute()) * 60 + u64::from(ts.second()),
            Self::Minute => u64::from(ts.second()),
        };
        elapsed / target_duration.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub enabled: bool,
    pub output: PathBuf,
    pub index_name: String,
    pub resegment: bool,
    pub remove_old: bool,
    pub clean_folder: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            output: PathBuf::from("."),
            index_name: "live.m3u8".to_string(),
            resegment: false,
            remove_old: false,
            clean_folder: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordOptions {
    pub enabled: bool,
    pub output: PathBuf,
    pub segment_rewrite: String,
    pub reindex: bool,
    pub reindex_format: String,
    pub reindex_by: Granularity,
    pub timeshifting: bool,
    pub timeshift_filename: String,
    /// Window length in hours.
    pub timeshift_duration: u64,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            output: PathBuf::from("."),
            segment_rewrite: "%Y/%m/%d/%H/live-#:04.ts".to_string(),
            reindex: false,
            reindex_format: "%Y/%m/%d/%H/index.m3u8".to_string(),
            reindex_by: Granularity::Hour,
            timeshifting: false,
            timeshift_filename: "timeshift.m3u8".to_string(),
            timeshift_duration: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    /// Failover order; the first entry also seeds the re-segment filename prefix.
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub enabled: bool,
    pub listen: String,
    /// Maximum look-back from now, in days.
    pub days: u64,
    /// Maximum playlist span, in hours.
    pub max: u64,
    pub segment_prefix: String,
    pub cache_num: usize,
    /// Render cache TTL in seconds.
    pub cache_valid: u64,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "unix://./hls-sync.sock".to_string(),
            days: 7,
            max: 6,
            segment_prefix: String::new(),
            cache_num: 128,
            cache_valid: 60,
        }
    }
}

/// Parsed `scheme://address` listen target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    Unix(PathBuf),
}

impl ListenAddr {
    pub fn parse(listen: &str) -> Result<Self, ConfigError> {
        match listen.split_once("://") {
            Some(("tcp", addr)) if !addr.is_empty() => Ok(Self::Tcp(addr.to_string())),
            Some(("unix", path)) if !path.is_empty() => Ok(Self::Unix(PathBuf::from(path))),
            _ => Err(ConfigError::InvalidListen(listen.to_string())),
        }
    }
}

/// Full runtime configuration shared by every pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Attempts per segment download and failures tolerated per source URL.
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
    pub max_segments: usize,
    pub timestamp_type: TimestampMode,
    pub timestamp_format: String,
    /// Minutes added to program or segment timestamps.
    pub timezone_shift: i64,
    /// Overrides the source's target duration when non-zero.
    pub target_duration: u64,
    pub program_time_format: String,
    pub program_timezone: String,

    pub sync: SyncOptions,
    pub record: RecordOptions,
    pub source: SourceOptions,
    pub http: HttpOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            log_level: "info".to_string(),
            timeout: 5,
            retries: 1,
            retry_delay_ms: 1000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_segments: 20,
            timestamp_type: TimestampMode::Program,
            timestamp_format: String::new(),
            timezone_shift: 0,
            target_duration: 0,
            program_time_format: "%Y-%m-%dT%H:%M:%S%.f".to_string(),
            program_timezone: "UTC".to_string(),
            sync: SyncOptions::default(),
            record: RecordOptions::default(),
            source: SourceOptions::default(),
            http: HttpOptions::default(),
        }
    }
}

impl SyncConfig {
    /// Checks every startup invariant. Any error here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.urls.is_empty() {
            return Err(ConfigError::NoSource);
        }
        for url in &self.source.urls {
            url::Url::parse(url).map_err(|e| ConfigError::InvalidSource {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        }
        self.timezone()?;
        if self.max_segments == 0 {
            return Err(ConfigError::Zero("max_segments"));
        }
        if self.record.enabled && self.record.timeshifting && self.record.timeshift_duration == 0 {
            return Err(ConfigError::Zero("record.timeshift_duration"));
        }
        if self.http.enabled {
            if !self.record.enabled || !self.record.reindex {
                return Err(ConfigError::HttpWithoutReindex);
            }
            if self.http.cache_num == 0 {
                return Err(ConfigError::Zero("http.cache_num"));
            }
            ListenAddr::parse(&self.http.listen)?;
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.program_timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.program_timezone.clone()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Download attempts per segment, never fewer than one.
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    pub fn timezone_shift(&self) -> TimeDelta {
        TimeDelta::minutes(self.timezone_shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn base() -> SyncConfig {
        SyncConfig {
            source: SourceOptions {
                urls: vec!["http://example.com/live/index.m3u8".to_string()],
            },
            ..Default::default()
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_milli_opt(h, m, s, 250))
            .unwrap()
    }

    #[test]
    fn defaults_validate_with_a_source() {
        assert!(base().validate().is_ok());
        assert!(matches!(
            SyncConfig::default().validate(),
            Err(ConfigError::NoSource)
        ));
    }

    #[test]
    fn rejects_unknown_timezone() {
        let mut cfg = base();
        cfg.program_timezone = "Mars/Olympus".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTimezone(_))));
    }

    #[test]
    fn http_requires_record_and_reindex() {
        let mut cfg = base();
        cfg.http.enabled = true;
        assert!(matches!(cfg.validate(), Err(ConfigError::HttpWithoutReindex)));

        cfg.record.enabled = true;
        cfg.record.reindex = true;
        assert!(cfg.validate().is_ok());

        cfg.http.listen = "udp://0.0.0.0:1".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidListen(_))));
    }

    #[test]
    fn parses_listen_addresses() {
        assert_eq!(
            ListenAddr::parse("tcp://127.0.0.1:8080").unwrap(),
            ListenAddr::Tcp("127.0.0.1:8080".to_string())
        );
        assert_eq!(
            ListenAddr::parse("unix:///run/hls.sock").unwrap(),
            ListenAddr::Unix(PathBuf::from("/run/hls.sock"))
        );
        assert!(ListenAddr::parse("127.0.0.1:8080").is_err());
        assert!(ListenAddr::parse("tcp://").is_err());
    }

    #[test]
    fn granularity_truncates_and_slots() {
        let ts = at(10, 17, 42);
        assert_eq!(Granularity::Hour.truncate(ts), at(10, 0, 0).with_nanosecond(0).unwrap());
        assert_eq!(Granularity::Minute.truncate(ts), at(10, 17, 0).with_nanosecond(0).unwrap());
        assert_eq!(Granularity::Hour.slot(ts, 6), (17 * 60 + 42) / 6);
        assert_eq!(Granularity::Minute.slot(ts, 6), 7);
        assert_eq!(Granularity::Hour.capacity(), 2048);
        assert_eq!(Granularity::Minute.capacity(), 128);
    }

    #[test]
    fn deserializes_partial_toml_sections() {
        let cfg: SyncConfig = toml::from_str(
            r#"
timestamp_type = "segment"

[record]
enabled = true
reindex_by = "minute"

[source]
urls = ["http://example.com/a.m3u8"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.timestamp_type, TimestampMode::Segment);
        assert_eq!(cfg.record.reindex_by, Granularity::Minute);
        assert_eq!(cfg.record.timeshift_filename, "timeshift.m3u8");
        assert_eq!(cfg.http.cache_num, 128);
        assert_eq!(cfg.source.urls.len(), 1);
    }
}
