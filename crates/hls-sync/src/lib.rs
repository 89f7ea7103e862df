// HLS live mirroring, time-bucketed recording and time-shift playback
pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod crc16;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod playlist_io;
pub mod poller;
pub mod record;
pub mod retry;
pub mod server;
pub mod sync;
pub mod template;
pub mod timestamp;

pub use config::{
    ConfigError, Granularity, HttpOptions, ListenAddr, RecordOptions, SourceOptions, SyncConfig,
    SyncOptions, TimestampMode,
};
pub use coordinator::HlsSynchronizer;
pub use error::{Result, SyncError};
pub use events::{DownloadedSegment, PipelineEvent, Segment, SyncMessage};
pub use fetcher::SegmentFetcher;
pub use poller::PlaylistPoller;
pub use record::RecordEngine;
pub use sync::SyncSink;
