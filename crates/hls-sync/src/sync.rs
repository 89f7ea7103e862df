use std::path::{Path, PathBuf};

use m3u8_rs::MediaPlaylist;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::EvictingLru;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{DownloadedSegment, SyncMessage};
use crate::playlist_io::{ensure_parent, write_media_playlist};

/// Mirrors the live edge of the stream into a directory.
pub struct SyncSink {
    output: PathBuf,
    index_name: String,
    remove_old: bool,
    clean_folder: bool,
    synced: EvictingLru<String, PathBuf>,
}

fn is_protected(output: &Path) -> bool {
    matches!(output.to_str(), Some("" | "." | "/"))
}

impl SyncSink {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            output: config.sync.output.clone(),
            index_name: config.sync.index_name.clone(),
            remove_old: config.sync.remove_old,
            clean_folder: config.sync.clean_folder,
            synced: EvictingLru::new(config.max_segments),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.output.join(&self.index_name)
    }

    /// Deletes the regular files directly under the output directory.
    pub async fn clean_output(&self) -> Result<usize> {
        if is_protected(&self.output) {
            warn!(output = %self.output.display(), "Refusing to clean output folder");
            return Ok(0);
        }
        let mut entries = match tokio::fs::read_dir(&self.output).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(SyncError::io("listing", &self.output, e)),
        };
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::io("listing", &self.output, e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Cleared file");
                    removed += 1;
                }
                Err(e) => error!(path = %path.display(), error = %e, "Failed to clear file"),
            }
        }
        info!(output = %self.output.display(), removed, "Cleaned sync output folder");
        Ok(removed)
    }

    pub async fn write_segment(&mut self, downloaded: &DownloadedSegment) -> Result<PathBuf> {
        let name = &downloaded.segment.uri;
        let path = self.output.join(name);
        ensure_parent(&path).await?;
        tokio::fs::write(&path, &downloaded.data)
            .await
            .map_err(|e| SyncError::io("writing segment", &path, e))?;
        info!(
            name = %name,
            duration = downloaded.segment.duration,
            timestamp = %downloaded.segment.timestamp,
            bytes = downloaded.data.len(),
            "Synced segment"
        );

        if let Some((evicted, old_path)) = self.synced.insert(name.clone(), path.clone())
            && self.remove_old
        {
            match tokio::fs::remove_file(&old_path).await {
                Ok(()) => info!(name = %evicted, "Removed synced segment"),
                Err(e) => error!(path = %old_path.display(), error = %e, "Failed to remove old segment"),
            }
        }
        Ok(path)
    }

    pub async fn write_playlist(&self, playlist: &MediaPlaylist) -> Result<()> {
        let path = self.index_path();
        write_media_playlist(&path, playlist).await?;
        info!(
            path = %path.display(),
            media_sequence = playlist.media_sequence,
            segments = playlist.segments.len(),
            "Synced playlist"
        );
        Ok(())
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<SyncMessage>) {
        if self.clean_folder
            && let Err(e) = self.clean_output().await
        {
            error!(error = %e, "Failed to clean sync output folder");
        }
        while let Some(message) = rx.recv().await {
            let result = match message {
                SyncMessage::Playlist(playlist) => self.write_playlist(&playlist).await,
                SyncMessage::Segment(downloaded) => self.write_segment(&downloaded).await.map(drop),
            };
            if let Err(e) = result {
                error!(error = %e, "Sync failed");
            }
        }
        info!("Sync sink stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Segment;
    use bytes::Bytes;
    use chrono::DateTime;
    use m3u8_rs::MediaSegment;
    use std::sync::Arc;

    fn config(output: &Path, max_segments: usize, remove_old: bool) -> SyncConfig {
        let mut cfg = SyncConfig {
            max_segments,
            ..Default::default()
        };
        cfg.sync.enabled = true;
        cfg.sync.output = output.to_path_buf();
        cfg.sync.remove_old = remove_old;
        cfg
    }

    fn downloaded(name: &str) -> DownloadedSegment {
        DownloadedSegment {
            segment: Segment {
                uri: name.to_string(),
                duration: 6.0,
                timestamp: DateTime::parse_from_rfc3339("2024-03-09T10:00:00Z").unwrap(),
                sequence: 1,
                title: name.to_string(),
            },
            data: Bytes::from(name.as_bytes().to_vec()),
            target_duration: 6.0,
        }
    }

    #[tokio::test]
    async fn eviction_removes_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SyncSink::new(&config(dir.path(), 2, true));

        for name in ["a.ts", "b.ts", "c.ts"] {
            sink.write_segment(&downloaded(name)).await.unwrap();
        }
        assert!(!dir.path().join("a.ts").exists());
        assert!(dir.path().join("b.ts").exists());
        assert!(dir.path().join("c.ts").exists());
    }

    #[tokio::test]
    async fn rewriting_same_name_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SyncSink::new(&config(dir.path(), 1, true));
        sink.write_segment(&downloaded("a.ts")).await.unwrap();
        sink.write_segment(&downloaded("a.ts")).await.unwrap();
        assert!(dir.path().join("a.ts").exists());
    }

    #[tokio::test]
    async fn eviction_keeps_files_without_remove_old() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SyncSink::new(&config(dir.path(), 1, false));
        sink.write_segment(&downloaded("a.ts")).await.unwrap();
        sink.write_segment(&downloaded("b.ts")).await.unwrap();
        assert!(dir.path().join("a.ts").exists());
    }

    #[tokio::test]
    async fn write_failure_does_not_stop_sync() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blocked"), b"file").unwrap();
        let sink = SyncSink::new(&config(dir.path(), 4, false));
        let (tx, rx) = mpsc::channel(20);
        let handle = tokio::spawn(sink.run(rx));

        tx.send(SyncMessage::Segment(downloaded("blocked/a.ts"))).await.unwrap();
        tx.send(SyncMessage::Segment(downloaded("b.ts"))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("b.ts")).unwrap(), b"b.ts");
        assert!(dir.path().join("blocked").is_file());
    }

    #[tokio::test]
    async fn clean_output_removes_only_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stale.ts"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("keep")).unwrap();
        let mut cfg = config(dir.path(), 4, false);
        cfg.sync.clean_folder = true;

        let removed = SyncSink::new(&cfg).clean_output().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("stale.ts").exists());
        assert!(dir.path().join("keep").is_dir());
    }

    #[tokio::test]
    async fn clean_output_refuses_current_directory() {
        let mut cfg = config(Path::new("."), 4, false);
        cfg.sync.clean_folder = true;
        assert_eq!(SyncSink::new(&cfg).clean_output().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_writes_playlist_and_segments() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SyncSink::new(&config(dir.path(), 4, false));
        let (tx, rx) = mpsc::channel(20);
        let handle = tokio::spawn(sink.run(rx));

        tx.send(SyncMessage::Segment(downloaded("a.ts"))).await.unwrap();
        let playlist = MediaPlaylist {
            target_duration: 6,
            media_sequence: 1,
            segments: vec![MediaSegment {
                uri: "a.ts".to_string(),
                duration: 6.0,
                ..Default::default()
            }],
            ..Default::default()
        };
        tx.send(SyncMessage::Playlist(Arc::new(playlist))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let index = std::fs::read_to_string(dir.path().join("live.m3u8")).unwrap();
        assert!(index.contains("a.ts"));
        assert_eq!(std::fs::read(dir.path().join("a.ts")).unwrap(), b"a.ts");
    }
}
