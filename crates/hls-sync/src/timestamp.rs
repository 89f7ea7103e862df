use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use m3u8_rs::MediaSegment;
use tracing::debug;

use crate::config::{ConfigError, SyncConfig, TimestampMode};

pub type Timestamp = DateTime<FixedOffset>;

const PROGRAM_DATE_TIME_TAG: &str = "#EXT-X-PROGRAM-DATE-TIME:";
const ISO_LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
/// Anything earlier is treated as a missing or broken timestamp.
const MIN_PLAUSIBLE_YEAR: i32 = 2016;

pub fn is_plausible(ts: &Timestamp) -> bool {
    ts.year() >= MIN_PLAUSIBLE_YEAR
}

fn localize(naive: NaiveDateTime, tz: Tz) -> Option<Timestamp> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

/// Parses a program date-time value: RFC 3339 first, then `format` with an
/// explicit offset, then `format` and plain ISO 8601 as local time in `tz`.
pub fn parse_program_time(value: &str, format: &str, tz: Tz) -> Option<Timestamp> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts);
    }
    if !format.is_empty() {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            return Some(ts);
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return localize(naive, tz);
        }
    }
    NaiveDateTime::parse_from_str(value, ISO_LOCAL_FORMAT)
        .ok()
        .and_then(|naive| localize(naive, tz))
}

/// Rewrites every `#EXT-X-PROGRAM-DATE-TIME` value into RFC 3339 so the
/// playlist decoder accepts it. Lines that cannot be parsed are dropped.
pub fn normalize_program_dates(content: &str, format: &str, tz: Tz) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        if let Some(value) = line.strip_prefix(PROGRAM_DATE_TIME_TAG) {
            if DateTime::parse_from_rfc3339(value.trim()).is_ok() {
                out.push_str(line);
            } else if let Some(ts) = parse_program_time(value, format, tz) {
                out.push_str(PROGRAM_DATE_TIME_TAG);
                out.push_str(&ts.to_rfc3339());
            } else {
                debug!(value, "Dropping unparsable program date-time");
                continue;
            }
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Extracts a timestamp from a segment URI. The whole URI is tried first, then
/// its file name; trailing text after the timestamp is ignored.
pub fn parse_segment_time(uri: &str, format: &str, tz: Tz) -> Option<Timestamp> {
    if format.is_empty() {
        return None;
    }
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let name = path.rsplit('/').next().unwrap_or(path);
    [uri, name].into_iter().find_map(|candidate| {
        if let Ok((ts, _)) = DateTime::parse_and_remainder(candidate, format) {
            return Some(ts);
        }
        NaiveDateTime::parse_and_remainder(candidate, format)
            .ok()
            .and_then(|(naive, _)| localize(naive, tz))
    })
}

/// Assigns program timestamps to newly observed segments.
///
/// Segments without a usable timestamp get one from a running clock that is
/// reseeded at the start of every poll round and advanced by each segment's
/// duration.
#[derive(Debug, Clone)]
pub struct TimestampResolver {
    mode: TimestampMode,
    segment_format: String,
    tz: Tz,
    shift: TimeDelta,
    clock: Timestamp,
}

impl TimestampResolver {
    pub fn new(mode: TimestampMode, segment_format: impl Into<String>, tz: Tz, shift: TimeDelta) -> Self {
        Self {
            mode,
            segment_format: segment_format.into(),
            tz,
            shift,
            clock: chrono::Local::now().fixed_offset(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.timestamp_type,
            config.timestamp_format.clone(),
            config.timezone()?,
            config.timezone_shift(),
        ))
    }

    pub fn begin_round(&mut self, now: Timestamp) {
        self.clock = now;
    }

    /// Moves the running clock past a segment that was already timestamped.
    pub fn observe_known(&mut self, ts: Timestamp, duration: f64) {
        self.clock = ts + duration_delta(duration);
    }

    pub fn resolve(&mut self, segment: &MediaSegment) -> Timestamp {
        let embedded = match self.mode {
            TimestampMode::Local => None,
            TimestampMode::Program => segment.program_date_time,
            TimestampMode::Segment => parse_segment_time(&segment.uri, &self.segment_format, self.tz),
        };
        match embedded.filter(is_plausible) {
            Some(ts) => ts + self.shift,
            None => {
                let ts = self.clock;
                self.clock = ts + duration_delta(f64::from(segment.duration));
                ts
            }
        }
    }
}

pub fn duration_delta(seconds: f64) -> TimeDelta {
    TimeDelta::milliseconds((seconds * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shanghai() -> Tz {
        "Asia/Shanghai".parse().unwrap()
    }

    fn segment(uri: &str, duration: f32, pdt: Option<&str>) -> MediaSegment {
        MediaSegment {
            uri: uri.to_string(),
            duration,
            program_date_time: pdt.map(|v| DateTime::parse_from_rfc3339(v).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn normalizes_zone_less_program_time() {
        let input = "#EXTM3U\n#EXT-X-PROGRAM-DATE-TIME:2024-03-09T10:00:00.500\n#EXTINF:6.0,\na.ts\n";
        let out = normalize_program_dates(input, ISO_LOCAL_FORMAT, shanghai());
        assert!(out.contains("#EXT-X-PROGRAM-DATE-TIME:2024-03-09T10:00:00.500+08:00"));
        assert!(out.contains("a.ts"));
    }

    #[test]
    fn drops_garbage_program_time_and_keeps_rfc3339() {
        let input = "#EXT-X-PROGRAM-DATE-TIME:yesterday\n#EXT-X-PROGRAM-DATE-TIME:2024-03-09T10:00:00Z\n";
        let out = normalize_program_dates(input, "%d/%m/%Y", chrono_tz::UTC);
        assert!(!out.contains("yesterday"));
        assert!(out.contains("2024-03-09T10:00:00Z"));
    }

    #[test]
    fn custom_program_time_format() {
        let ts = parse_program_time("2024/03/09 10:00:00", "%Y/%m/%d %H:%M:%S", chrono_tz::UTC).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-09T10:00:00+00:00");
    }

    #[test]
    fn parses_segment_uri_with_trailing_text() {
        let ts = parse_segment_time(
            "http://cdn.example.com/ch1/20240309100006-12.ts?token=x",
            "%Y%m%d%H%M%S",
            chrono_tz::UTC,
        )
        .unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-09T10:00:06+00:00");
        assert!(parse_segment_time("seg.ts", "%Y%m%d%H%M%S", chrono_tz::UTC).is_none());
    }

    #[test]
    fn program_mode_applies_shift() {
        let mut resolver = TimestampResolver::new(
            TimestampMode::Program,
            "",
            chrono_tz::UTC,
            TimeDelta::minutes(30),
        );
        let ts = resolver.resolve(&segment("a.ts", 6.0, Some("2024-03-09T10:00:00Z")));
        assert_eq!(ts.to_rfc3339(), "2024-03-09T10:30:00+00:00");
    }

    #[test]
    fn implausible_or_missing_times_use_running_clock() {
        let mut resolver =
            TimestampResolver::new(TimestampMode::Program, "", chrono_tz::UTC, TimeDelta::zero());
        let seed = DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z").unwrap();
        resolver.begin_round(seed);

        let first = resolver.resolve(&segment("a.ts", 4.0, Some("1970-01-01T00:00:00Z")));
        let second = resolver.resolve(&segment("b.ts", 4.0, None));
        assert_eq!(first, seed);
        assert_eq!(second, seed + TimeDelta::seconds(4));
    }

    #[test]
    fn local_mode_ignores_embedded_time() {
        let mut resolver =
            TimestampResolver::new(TimestampMode::Local, "", chrono_tz::UTC, TimeDelta::hours(1));
        let seed = DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z").unwrap();
        resolver.begin_round(seed);
        resolver.observe_known(seed, 6.0);
        let ts = resolver.resolve(&segment("c.ts", 6.0, Some("2024-03-09T10:00:00Z")));
        assert_eq!(ts, seed + TimeDelta::seconds(6));
    }
}
