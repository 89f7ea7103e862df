use std::path::Path;
use std::sync::LazyLock;

use axum::extract::{Query, State};
use axum::http::{Method, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use m3u8_rs::MediaPlaylist;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::TimeshiftState;
use super::error::TimeshiftError;
use crate::cache::RenderCache;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::playlist_io::{encode, read_media_playlist};
use crate::record::{bucket_path, bucket_time};
use crate::template;

pub const MPEGURL: &str = "application/vnd.apple.mpegurl";

static PLAYLIST_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]+)[-_]([0-9]+).m3u8").expect("playlist name pattern is valid")
});

#[derive(Debug, Default, Deserialize)]
pub struct TimeshiftQuery {
    pub playlist: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub duration: Option<String>,
}

/// Requested span in Unix seconds, `start` inclusive and `end` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

fn parse_seconds(name: &str, value: &str) -> Result<i64, TimeshiftError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| TimeshiftError::bad_request(format!("Invalid '{name}' parameter: '{value}'")))
}

impl TimeshiftQuery {
    /// Resolves the three accepted query shapes into a range.
    pub fn range(&self) -> Result<TimeRange, TimeshiftError> {
        let named = match self.playlist.as_deref().filter(|p| !p.is_empty()) {
            Some(name) => {
                let caps = PLAYLIST_NAME.captures(name).ok_or_else(|| {
                    TimeshiftError::bad_request(format!("Invalid playlist name format: {name}"))
                })?;
                Some((caps[1].to_string(), caps[2].to_string()))
            }
            None => None,
        };
        let (start, end) = match &named {
            Some((start, end)) => (Some(start.as_str()), Some(end.as_str())),
            None => (self.start.as_deref(), self.end.as_deref()),
        };

        let start = match start.filter(|s| !s.is_empty()) {
            Some(start) => parse_seconds("start", start)?,
            None => return Err(TimeshiftError::bad_request("Unknown query parameter")),
        };
        let end = match (end.filter(|s| !s.is_empty()), self.duration.as_deref()) {
            (Some(end), _) => parse_seconds("end", end)?,
            (None, Some(duration)) if !duration.is_empty() => {
                start.saturating_add(parse_seconds("duration", duration)?)
            }
            _ => {
                return Err(TimeshiftError::bad_request(
                    "Missing query parameter 'duration' or 'end'",
                ));
            }
        };
        Ok(TimeRange { start, end })
    }
}

impl TimeRange {
    /// Rejects empty, too old, or too long ranges.
    pub fn validate(&self, now: i64, max_days: u64, max_hours: u64) -> Result<(), TimeshiftError> {
        if self.start >= self.end {
            return Err(TimeshiftError::bad_request(
                "Start timestamp must be before end timestamp",
            ));
        }
        let max_age = i64::try_from(max_days.saturating_mul(86_400)).unwrap_or(i64::MAX);
        if now.saturating_sub(self.start) > max_age {
            return Err(TimeshiftError::bad_request(format!(
                "Can not provide shifting before {max_days} days"
            )));
        }
        let max_span = i64::try_from(max_hours.saturating_mul(3_600)).unwrap_or(i64::MAX);
        if self.end.saturating_sub(self.start) > max_span {
            return Err(TimeshiftError::bad_request(format!(
                "Can not provide playlist longer than {max_hours} hours"
            )));
        }
        Ok(())
    }

    fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), TimeshiftError> {
        let at = |secs: i64| {
            DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| TimeshiftError::bad_request(format!("Timestamp out of range: {secs}")))
        };
        Ok((at(self.start)?, at(self.end)?))
    }
}

fn join_uri(prefix: &str, dir: &str, uri: &str) -> String {
    [prefix.trim_end_matches('/'), dir.trim_matches('/'), uri]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Stitches the index buckets overlapping `[start, end]` into one closed playlist.
/// Buckets that are missing or cannot be decoded are skipped.
pub async fn build_playlist(
    config: &SyncConfig,
    tz: Tz,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<MediaPlaylist> {
    let record = &config.record;
    let granularity = record.reindex_by;
    let end_local = end.with_timezone(&tz).naive_local();
    let mut key = granularity.truncate(start.with_timezone(&tz).naive_local());
    let mut output = MediaPlaylist {
        version: Some(3),
        end_list: true,
        ..Default::default()
    };

    while key < end_local {
        let index_path = bucket_path(&record.output, &record.reindex_format, key, tz)?;
        let rendered = template::render(&record.reindex_format, &bucket_time(key, tz), 0)?;
        let dir = Path::new(&rendered)
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        key += granularity.step();

        let bucket = match read_media_playlist(&index_path).await {
            Ok(Some(bucket)) => bucket,
            Ok(None) => {
                debug!(path = %index_path.display(), "No index playlist for bucket");
                continue;
            }
            Err(e) => {
                warn!(path = %index_path.display(), error = %e, "Skipping unreadable index playlist");
                continue;
            }
        };

        for mut segment in bucket.segments {
            let Some(ts) = segment.program_date_time else {
                continue;
            };
            if ts < start || ts > end {
                continue;
            }
            segment.uri = join_uri(&config.http.segment_prefix, &dir, &segment.uri);
            output.segments.push(segment);
        }
    }

    output.target_duration = output
        .segments
        .iter()
        .map(|s| f64::from(s.duration).ceil() as u64)
        .max()
        .unwrap_or(0)
        .max(1);
    Ok(output)
}

fn playlist_response(body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, MPEGURL)], body).into_response()
}

/// `GET /?playlist=START_END.m3u8`, `GET /?start=S&end=E` or `GET /?start=S&duration=D`.
pub async fn serve_playlist(
    State(state): State<TimeshiftState>,
    method: Method,
    Query(query): Query<TimeshiftQuery>,
) -> Result<Response, TimeshiftError> {
    if method != Method::GET {
        return Err(TimeshiftError::bad_request("Invalid request method"));
    }
    let range = query.range()?;
    let http = &state.config.http;
    range.validate(Utc::now().timestamp(), http.days, http.max)?;
    let (start, end) = range.bounds()?;

    let key = RenderCache::key(range.start, range.end);
    if let Some(body) = state.cache.get(&key).await {
        debug!(key = %key, "Serving cached playlist");
        return Ok(playlist_response(body));
    }

    info!(start = %start, end = %end, "Building time-shift playlist");
    let playlist = build_playlist(&state.config, state.tz, start, end).await?;
    let body = Bytes::from(encode(&playlist)?);
    state.cache.insert(key, body.clone()).await;
    Ok(playlist_response(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> TimeshiftQuery {
        let mut q = TimeshiftQuery::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "playlist" => q.playlist = v,
                "start" => q.start = v,
                "end" => q.end = v,
                "duration" => q.duration = v,
                _ => {}
            }
        }
        q
    }

    #[test]
    fn parses_all_query_shapes() {
        let expected = TimeRange { start: 1000, end: 1060 };
        assert_eq!(query(&[("playlist", "1000_1060.m3u8")]).range().unwrap(), expected);
        assert_eq!(query(&[("playlist", "1000-1060.m3u8")]).range().unwrap(), expected);
        assert_eq!(query(&[("start", "1000"), ("end", "1060")]).range().unwrap(), expected);
        assert_eq!(query(&[("start", "1000"), ("duration", "60")]).range().unwrap(), expected);
    }

    #[test]
    fn rejects_malformed_queries() {
        assert!(query(&[("playlist", "live.m3u8")]).range().is_err());
        assert!(query(&[("start", "abc"), ("end", "1")]).range().is_err());
        assert!(query(&[("start", "1"), ("duration", "x")]).range().is_err());
        assert!(query(&[("start", "1")]).range().is_err());
        assert!(query(&[]).range().is_err());
    }

    #[test]
    fn validation_order_and_limits() {
        let now = 10 * 86_400;
        let empty = TimeRange { start: 1000, end: 500 };
        assert!(empty.validate(now, 7, 6).unwrap_err().message.contains("before end"));

        let too_old = TimeRange { start: 1000, end: 1060 };
        assert!(too_old.validate(now, 7, 6).unwrap_err().message.contains("days"));

        let start = now - 3600;
        let too_long = TimeRange { start, end: start + 7 * 3600 };
        assert!(too_long.validate(now, 7, 6).unwrap_err().message.contains("hours"));

        let fine = TimeRange { start, end: start + 60 };
        assert!(fine.validate(now, 7, 6).is_ok());
    }

    #[test]
    fn extreme_span_is_rejected_as_too_long() {
        let now = chrono::Utc::now().timestamp();
        let range = TimeRange {
            start: -700_000_000,
            end: i64::MAX,
        };
        let err = range.validate(now, 30_000, 6).unwrap_err();
        assert!(err.message.contains("hours"));
    }

    #[test]
    fn joins_prefix_dir_and_name() {
        assert_eq!(join_uri("", "2024/03/09/10", "live-0001.ts"), "2024/03/09/10/live-0001.ts");
        assert_eq!(
            join_uri("http://cdn/rec/", "2024/03/09/10", "live-0001.ts"),
            "http://cdn/rec/2024/03/09/10/live-0001.ts"
        );
        assert_eq!(join_uri("/media", "", "a.ts"), "/media/a.ts");
    }
}
