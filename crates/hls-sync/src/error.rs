use std::path::{Path, PathBuf};

use reqwest::StatusCode;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("HTTP request failed for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("expected a media playlist from {url}, got a master playlist")]
    NotMediaPlaylist { url: String },

    #[error("I/O error while {operation} `{}`: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid filename template `{template}`: {reason}")]
    Template { template: String, reason: String },

    #[error("{stage} task failed: {reason}")]
    Task { stage: &'static str, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn io(operation: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Transient failures are worth another attempt against the same source.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Template { .. }
            | Self::Task { .. }
            | Self::Config(_) => false,
            Self::Network { .. }
            | Self::HttpStatus { .. }
            | Self::Playlist { .. }
            | Self::NotMediaPlaylist { .. }
            | Self::Io { .. } => true,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_and_decode_errors_are_retryable() {
        assert!(SyncError::http_status(StatusCode::NOT_FOUND, "http://a/b.ts").is_retryable());
        assert!(SyncError::playlist("bad header").is_retryable());
        assert!(!SyncError::template("%Q", "bad specifier").is_retryable());
    }

    #[test]
    fn io_error_mentions_path() {
        let err = SyncError::io(
            "writing segment",
            "/tmp/out/seg.ts",
            std::io::Error::other("disk full"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/out/seg.ts"));
        assert!(msg.contains("writing segment"));
    }
}
