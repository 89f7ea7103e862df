//! Time-bucketed recording with per-bucket index playlists and an optional
//! rolling time-shift playlist.

mod bucket;
mod timeshift;

pub use bucket::IndexBucket;
pub use timeshift::TimeshiftWindow;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use m3u8_rs::MediaSegment;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, Granularity, SyncConfig};
use crate::error::{Result, SyncError};
use crate::events::DownloadedSegment;
use crate::playlist_io::{ensure_parent, has_content, read_media_playlist};
use crate::template;
use crate::timestamp::{Timestamp, duration_delta};

/// Wall-clock instant of a bucket key in `tz`.
pub fn bucket_time(key: NaiveDateTime, tz: Tz) -> DateTime<Tz> {
    tz.from_local_datetime(&key)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&key))
}

/// Index file of the bucket starting at `key`.
pub fn bucket_path(root: &Path, format: &str, key: NaiveDateTime, tz: Tz) -> Result<PathBuf> {
    template::render_path(root, format, &bucket_time(key, tz), 0)
}

fn relative_uri(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Some(parts.join("/"))
}

/// Owns every on-disk artifact under the record output root.
pub struct RecordEngine {
    output: PathBuf,
    segment_rewrite: String,
    reindex: bool,
    reindex_format: String,
    granularity: Granularity,
    timeshift: Option<(PathBuf, u64)>,
    tz: Tz,
    target_override: u64,

    target_duration: Option<u64>,
    current_key: Option<NaiveDateTime>,
    bucket: Option<IndexBucket>,
    window: Option<TimeshiftWindow>,
    last: Option<(Timestamp, f64)>,
    index: u64,
}

impl RecordEngine {
    pub fn new(config: &SyncConfig) -> Result<Self, ConfigError> {
        let record = &config.record;
        Ok(Self {
            output: record.output.clone(),
            segment_rewrite: record.segment_rewrite.clone(),
            reindex: record.reindex,
            reindex_format: record.reindex_format.clone(),
            granularity: record.reindex_by,
            timeshift: record.timeshifting.then(|| {
                (
                    record.output.join(&record.timeshift_filename),
                    record.timeshift_duration,
                )
            }),
            tz: config.timezone()?,
            target_override: config.target_duration,
            target_duration: None,
            current_key: None,
            bucket: None,
            window: None,
            last: None,
            index: 0,
        })
    }

    pub fn current_bucket(&self) -> Option<&IndexBucket> {
        self.bucket.as_ref()
    }

    pub fn timeshift_window(&self) -> Option<&TimeshiftWindow> {
        self.window.as_ref()
    }

    fn target_duration(&mut self, advertised: f64) -> u64 {
        let override_td = self.target_override;
        *self.target_duration.get_or_insert_with(|| {
            if override_td > 0 {
                override_td
            } else {
                (advertised as u64).max(1)
            }
        })
    }

    async fn ensure_window(&mut self, target_duration: u64) {
        if self.window.is_some() {
            return;
        }
        if let Some((path, hours)) = &self.timeshift {
            let capacity = TimeshiftWindow::capacity_for(*hours, target_duration);
            debug!(capacity, "Opening timeshift window");
            self.window = Some(TimeshiftWindow::open(path.clone(), capacity, target_duration).await);
        }
    }

    /// Reopens the on-disk bucket for `key` left by a previous run, if any.
    async fn resume_bucket(&mut self, key: NaiveDateTime, target_duration: u64) {
        let path = match bucket_path(&self.output, &self.reindex_format, key, self.tz) {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "Cannot render index playlist path");
                return;
            }
        };
        let previous = match read_media_playlist(&path).await {
            Ok(Some(previous)) if !previous.segments.is_empty() => previous,
            Ok(_) => return,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable index playlist");
                return;
            }
        };

        let bucket = IndexBucket::resume(key, path, self.granularity, previous);
        if let Some(trailing) = bucket.last()
            && let Some(ts) = trailing.program_date_time
        {
            let local = ts.with_timezone(&self.tz).naive_local();
            self.index = self.granularity.slot(local, target_duration) + 1;
            self.last = Some((ts, f64::from(trailing.duration)));
        }
        info!(
            path = %bucket.path().display(),
            segments = bucket.len(),
            index = self.index,
            "Resumed index playlist"
        );
        self.current_key = Some(key);
        self.bucket = Some(bucket);
    }

    async fn roll_over(&mut self, key: NaiveDateTime, local: NaiveDateTime, target_duration: u64) {
        if let Some(previous) = self.bucket.take() {
            let path = previous.path().to_path_buf();
            match previous.close().await {
                Ok(()) => info!(path = %path.display(), "Closed index playlist"),
                Err(e) => error!(path = %path.display(), error = %e, "Failed to flush index playlist"),
            }
        }
        if self.reindex {
            match bucket_path(&self.output, &self.reindex_format, key, self.tz) {
                Ok(path) => {
                    self.bucket = Some(IndexBucket::new(key, path, self.granularity, target_duration));
                }
                Err(e) => error!(error = %e, "Cannot render index playlist path"),
            }
        }
        self.current_key = Some(key);
        self.index = self.granularity.slot(local, target_duration);
    }

    /// Records one segment. Returns the written path, or `None` when a file
    /// already existed at the target path.
    pub async fn record(&mut self, downloaded: &DownloadedSegment) -> Result<Option<PathBuf>> {
        let segment = &downloaded.segment;
        let target_duration = self.target_duration(downloaded.target_duration);
        self.ensure_window(target_duration).await;

        let ts = segment.timestamp;
        let local = ts.with_timezone(&self.tz).naive_local();
        let key = self.granularity.truncate(local);

        if self.current_key.is_none() && self.reindex {
            self.resume_bucket(key, target_duration).await;
        }
        if self.current_key != Some(key) {
            self.roll_over(key, local, target_duration).await;
        } else if let Some((last_ts, last_duration)) = self.last
            && last_duration > 0.0
            && ts - last_ts > duration_delta(last_duration * 2.0)
        {
            self.index = self.granularity.slot(local, target_duration);
            info!(
                gap_secs = (ts - last_ts).num_seconds(),
                index = self.index,
                "Stream gap detected, renumbering"
            );
        }

        let path = template::render_path(
            &self.output,
            &self.segment_rewrite,
            &ts.with_timezone(&self.tz),
            self.index + 1,
        )?;
        self.last = Some((ts, segment.duration));
        self.index += 1;
        let sequence = self.index;

        if has_content(&path).await {
            warn!(path = %path.display(), "Segment file exists, skipped");
            return Ok(None);
        }
        ensure_parent(&path).await?;
        tokio::fs::write(&path, &downloaded.data)
            .await
            .map_err(|e| SyncError::io("writing segment", &path, e))?;
        info!(
            source = %segment.title,
            timestamp = %ts,
            path = %path.display(),
            "Recorded segment"
        );

        let entry = |uri: String| MediaSegment {
            uri,
            duration: segment.duration as f32,
            title: Some(segment.title.clone()),
            program_date_time: Some(ts),
            ..Default::default()
        };

        if let Some(bucket) = self.bucket.as_mut() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if bucket.append(entry(name), sequence) {
                if let Err(e) = bucket.save().await {
                    error!(error = %e, "Failed to update index playlist");
                }
            } else {
                warn!(path = %bucket.path().display(), "Index playlist is full, entry skipped");
            }
        }

        if let Some(window) = self.window.as_mut() {
            match relative_uri(&self.output, &path) {
                Some(uri) => {
                    window.push(entry(uri));
                    if let Err(e) = window.save().await {
                        error!(error = %e, "Failed to update timeshift playlist");
                    }
                }
                None => error!(path = %path.display(), "Segment path escapes the record output"),
            }
        }

        Ok(Some(path))
    }

    /// Flushes the open bucket as complete.
    pub async fn finish(mut self) {
        if let Some(bucket) = self.bucket.take()
            && let Err(e) = bucket.close().await
        {
            error!(error = %e, "Failed to flush index playlist on shutdown");
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<DownloadedSegment>) {
        info!(output = %self.output.display(), "Record engine started");
        while let Some(downloaded) = rx.recv().await {
            if let Err(e) = self.record(&downloaded).await {
                error!(source = %downloaded.segment.title, error = %e, "Failed to record segment");
            }
        }
        self.finish().await;
        info!("Record engine stopped");
    }
}
