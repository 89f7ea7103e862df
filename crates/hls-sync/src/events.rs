use std::sync::Arc;

use bytes::Bytes;
use m3u8_rs::MediaPlaylist;
use url::Url;

use crate::timestamp::Timestamp;

/// A source segment with its resolved program timestamp.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Source URI until the fetcher rewrites it to the output file name.
    pub uri: String,
    pub duration: f64,
    pub timestamp: Timestamp,
    pub sequence: u64,
    /// Source URI, kept for traceability after the rewrite.
    pub title: String,
}

/// Emitted by the poller, consumed by the fetcher.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Full decoded playlist after a round that produced new segments.
    Playlist {
        playlist: Arc<MediaPlaylist>,
        /// Program timestamps for each segment, in playlist order.
        timestamps: Arc<[Timestamp]>,
    },
    Segment {
        segment: Segment,
        duplicate: bool,
        target_duration: f64,
        /// Final URL of the playlist response; relative URIs resolve against it.
        playlist_url: Arc<Url>,
    },
}

/// A freshly downloaded segment. The payload is shared between sinks.
#[derive(Debug, Clone)]
pub struct DownloadedSegment {
    pub segment: Segment,
    pub data: Bytes,
    pub target_duration: f64,
}

/// Input of the sync sink.
#[derive(Debug, Clone)]
pub enum SyncMessage {
    /// Playlist whose segment URIs already carry their output names.
    Playlist(Arc<MediaPlaylist>),
    Segment(DownloadedSegment),
}
