use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use m3u8_rs::{MediaPlaylist, MediaSegment};

use crate::config::Granularity;
use crate::error::Result;
use crate::playlist_io::write_media_playlist;

/// One index playlist covering an hour or a minute of recording.
#[derive(Debug)]
pub struct IndexBucket {
    key: NaiveDateTime,
    path: PathBuf,
    capacity: usize,
    playlist: MediaPlaylist,
}

impl IndexBucket {
    pub fn new(key: NaiveDateTime, path: PathBuf, granularity: Granularity, target_duration: u64) -> Self {
        Self {
            key,
            path,
            capacity: granularity.capacity(),
            playlist: MediaPlaylist {
                version: Some(3),
                target_duration,
                ..Default::default()
            },
        }
    }

    /// Continues a bucket left on disk by a previous run.
    pub fn resume(key: NaiveDateTime, path: PathBuf, granularity: Granularity, mut playlist: MediaPlaylist) -> Self {
        playlist.end_list = false;
        Self {
            key,
            path,
            capacity: granularity.capacity(),
            playlist,
        }
    }

    pub fn key(&self) -> NaiveDateTime {
        self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.playlist.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlist.segments.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn last(&self) -> Option<&MediaSegment> {
        self.playlist.segments.last()
    }

    /// Appends an entry numbered `sequence`. Returns false when the bucket is full.
    pub fn append(&mut self, segment: MediaSegment, sequence: u64) -> bool {
        if self.is_full() {
            return false;
        }
        if self.playlist.segments.is_empty() {
            self.playlist.media_sequence = sequence;
        }
        let needed = f64::from(segment.duration).ceil() as u64;
        self.playlist.target_duration = self.playlist.target_duration.max(needed);
        self.playlist.segments.push(segment);
        true
    }

    pub async fn save(&self) -> Result<()> {
        write_media_playlist(&self.path, &self.playlist).await
    }

    /// Marks the bucket complete and flushes it.
    pub async fn close(mut self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        self.playlist.end_list = true;
        self.save().await
    }
}
