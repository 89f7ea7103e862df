use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use m3u8_rs::{MediaPlaylist, MediaSegment};
use tracing::{info, warn};

use crate::error::Result;
use crate::playlist_io::{read_media_playlist, write_media_playlist};

/// Sliding window over the most recent recorded segments, independent of
/// bucket boundaries. Entry URIs are relative to the record output root.
#[derive(Debug)]
pub struct TimeshiftWindow {
    path: PathBuf,
    capacity: usize,
    target_duration: u64,
    media_sequence: u64,
    segments: VecDeque<MediaSegment>,
}

impl TimeshiftWindow {
    pub fn capacity_for(hours: u64, target_duration: u64) -> usize {
        let slots = hours.saturating_mul(3600) / target_duration.max(1);
        usize::try_from(slots).unwrap_or(usize::MAX).max(1)
    }

    pub fn new(path: PathBuf, capacity: usize, target_duration: u64) -> Self {
        Self {
            path,
            capacity: capacity.max(1),
            target_duration,
            media_sequence: 0,
            segments: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    /// Loads the window left by a previous run. A missing or unreadable file
    /// starts an empty window.
    pub async fn open(path: PathBuf, capacity: usize, target_duration: u64) -> Self {
        let mut window = Self::new(path, capacity, target_duration);
        match read_media_playlist(&window.path).await {
            Ok(Some(previous)) => {
                window.media_sequence = previous.media_sequence;
                window.segments.extend(previous.segments);
                while window.segments.len() > window.capacity {
                    window.segments.pop_front();
                    window.media_sequence += 1;
                }
                info!(
                    path = %window.path.display(),
                    segments = window.segments.len(),
                    "Resumed timeshift playlist"
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %window.path.display(), error = %e, "Discarding unreadable timeshift playlist");
            }
        }
        window
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `segment`, evicting the oldest entry first when full.
    pub fn push(&mut self, segment: MediaSegment) -> Option<MediaSegment> {
        let evicted = if self.segments.len() >= self.capacity {
            self.media_sequence += 1;
            self.segments.pop_front()
        } else {
            None
        };
        self.segments.push_back(segment);
        evicted
    }

    pub fn to_playlist(&self) -> MediaPlaylist {
        let longest = self
            .segments
            .iter()
            .map(|s| f64::from(s.duration).ceil() as u64)
            .max()
            .unwrap_or(0);
        MediaPlaylist {
            version: Some(3),
            target_duration: self.target_duration.max(longest),
            media_sequence: self.media_sequence,
            segments: self.segments.iter().cloned().collect(),
            ..Default::default()
        }
    }

    pub async fn save(&self) -> Result<()> {
        write_media_playlist(&self.path, &self.to_playlist()).await
    }
}
