//! Reading and writing playlist files on disk.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use m3u8_rs::{MediaPlaylist, Playlist, parse_playlist_res};
use tracing::debug;

use crate::error::{Result, SyncError};

pub fn encode(playlist: &MediaPlaylist) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(256 + playlist.segments.len() * 96);
    playlist
        .write_to(&mut buf)
        .map_err(|e| SyncError::playlist(format!("failed to encode playlist: {e}")))?;
    Ok(buf)
}

pub fn decode_media(bytes: &[u8], origin: &str) -> Result<MediaPlaylist> {
    match parse_playlist_res(bytes) {
        Ok(Playlist::MediaPlaylist(playlist)) => Ok(playlist),
        Ok(Playlist::MasterPlaylist(_)) => Err(SyncError::NotMediaPlaylist {
            url: origin.to_string(),
        }),
        Err(e) => Err(SyncError::playlist(format!(
            "failed to parse playlist {origin}: {e}"
        ))),
    }
}

/// Reads a media playlist file. A missing or empty file yields `Ok(None)`.
pub async fn read_media_playlist(path: &Path) -> Result<Option<MediaPlaylist>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::io("reading playlist", path, e)),
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    decode_media(&bytes, &path.display().to_string()).map(Some)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}

pub async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io("creating directory", parent, e))?;
    }
    Ok(())
}

/// Writes `bytes` next to `path` and renames it into place, so readers see
/// either the previous or the new content.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path).await?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| SyncError::io("writing", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| SyncError::io("renaming into", path, e))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote playlist");
    Ok(())
}

pub async fn write_media_playlist(path: &Path, playlist: &MediaPlaylist) -> Result<()> {
    let bytes = encode(playlist)?;
    write_atomic(path, &bytes).await
}

/// True when `path` is a non-empty regular file.
pub async fn has_content(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use m3u8_rs::MediaSegment;

    fn sample() -> MediaPlaylist {
        MediaPlaylist {
            version: Some(3),
            target_duration: 6,
            media_sequence: 5,
            segments: vec![MediaSegment {
                uri: "live-0001.ts".to_string(),
                duration: 6.0,
                title: Some("http://src/a.ts".to_string()),
                program_date_time: Some(
                    DateTime::parse_from_rfc3339("2024-03-09T10:00:00Z").unwrap(),
                ),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/index.m3u8");
        write_media_playlist(&path, &sample()).await.unwrap();

        let read = read_media_playlist(&path).await.unwrap().unwrap();
        assert_eq!(read.segments.len(), 1);
        assert_eq!(read.segments[0].uri, "live-0001.ts");
        assert_eq!(read.media_sequence, 5);
        assert!(read.segments[0].program_date_time.is_some());
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn missing_file_is_none_and_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.m3u8");
        assert!(read_media_playlist(&path).await.unwrap().is_none());

        tokio::fs::write(&path, b"not a playlist").await.unwrap();
        assert!(read_media_playlist(&path).await.is_err());
    }

    #[tokio::test]
    async fn has_content_requires_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.ts");
        assert!(!has_content(&path).await);
        tokio::fs::write(&path, b"").await.unwrap();
        assert!(!has_content(&path).await);
        tokio::fs::write(&path, b"x").await.unwrap();
        assert!(has_content(&path).await);
    }

    #[test]
    fn master_playlist_is_rejected() {
        let master = b"#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1280000\nlow.m3u8\n";
        assert!(matches!(
            decode_media(master, "http://a/master.m3u8"),
            Err(SyncError::NotMediaPlaylist { .. })
        ));
    }
}
