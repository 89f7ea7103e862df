use std::path::{Component, Path};
use std::sync::Arc;

use bytes::Bytes;
use chrono_tz::Tz;
use m3u8_rs::MediaPlaylist;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{ConfigError, SyncConfig};
use crate::crc16;
use crate::error::{Result, SyncError};
use crate::events::{DownloadedSegment, PipelineEvent, Segment, SyncMessage};
use crate::retry::{RetryPolicy, retry_with_delay};
use crate::timestamp::Timestamp;

fn is_absolute(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// True when `uri` names a path that stays below the directory it is joined to.
fn stays_inside(uri: &str) -> bool {
    !uri.is_empty()
        && Path::new(uri)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Output file name for a segment: the source name, or a synthesized
/// `{source_id}_%Y%m%d-%H%M%S.ts` for absolute URIs, names that would leave
/// the output directory, and when re-segmenting.
pub fn output_name(uri: &str, timestamp: &Timestamp, source_id: &str, resegment: bool, tz: Tz) -> String {
    if resegment || is_absolute(uri) || !stays_inside(uri) {
        let stamp = timestamp.with_timezone(&tz).format("%Y%m%d-%H%M%S");
        format!("{source_id}_{stamp}.ts")
    } else {
        uri.to_string()
    }
}

/// Downloads new segments and fans them out to the enabled sinks.
pub struct SegmentFetcher {
    client: Client,
    policy: RetryPolicy,
    source_id: String,
    resegment: bool,
    tz: Tz,
}

impl SegmentFetcher {
    pub fn new(config: &SyncConfig, client: Client) -> Result<Self, ConfigError> {
        let first = config.source.urls.first().ok_or(ConfigError::NoSource)?;
        Ok(Self {
            client,
            policy: RetryPolicy::from_config(config),
            source_id: crc16::source_id(first),
            resegment: config.sync.resegment,
            tz: config.timezone()?,
        })
    }

    pub fn name_for(&self, uri: &str, timestamp: &Timestamp) -> String {
        output_name(uri, timestamp, &self.source_id, self.resegment, self.tz)
    }

    /// Copy of `playlist` with every segment URI replaced by its output name.
    pub fn rewrite_playlist(&self, playlist: &MediaPlaylist, timestamps: &[Timestamp]) -> MediaPlaylist {
        let mut rewritten = playlist.clone();
        for (seg, ts) in rewritten.segments.iter_mut().zip(timestamps) {
            seg.uri = self.name_for(&seg.uri, ts);
        }
        rewritten
    }

    async fn fetch_once(client: &Client, url: &Url) -> Result<Bytes> {
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SyncError::network(url.as_str(), e))?;
        if response.status() != StatusCode::OK {
            return Err(SyncError::http_status(response.status(), url.as_str()));
        }
        response
            .bytes()
            .await
            .map_err(|e| SyncError::network(url.as_str(), e))
    }

    /// Fetches `url`. Cancelling `token` stops further retries, but the
    /// first attempt is always made.
    pub async fn download(&self, url: &Url, token: &CancellationToken) -> Result<Bytes> {
        retry_with_delay(&self.policy, token, |attempt| async move {
            debug!(url = %url, attempt, "Downloading segment");
            Self::fetch_once(&self.client, url).await.into()
        })
        .await
    }

    /// Consumes events until the poller closes its channel. Segments queued
    /// before shutdown are still downloaded and handed on. Returning drops
    /// both outbound senders, which stops the sinks.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<PipelineEvent>,
        sync_tx: Option<mpsc::Sender<SyncMessage>>,
        record_tx: Option<mpsc::Sender<DownloadedSegment>>,
        token: CancellationToken,
    ) {
        info!(source_id = %self.source_id, "Segment fetcher started");
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Playlist {
                    playlist,
                    timestamps,
                } => {
                    let Some(tx) = &sync_tx else { continue };
                    let rewritten = self.rewrite_playlist(&playlist, &timestamps);
                    if tx.send(SyncMessage::Playlist(Arc::new(rewritten))).await.is_err() {
                        warn!("Sync sink is gone, dropping playlist");
                    }
                }
                PipelineEvent::Segment {
                    segment,
                    duplicate,
                    target_duration,
                    playlist_url,
                } => {
                    self.handle_segment(
                        segment,
                        duplicate,
                        target_duration,
                        &playlist_url,
                        sync_tx.as_ref(),
                        record_tx.as_ref(),
                        &token,
                    )
                    .await;
                }
            }
        }
        info!("Segment fetcher stopped");
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_segment(
        &self,
        mut segment: Segment,
        duplicate: bool,
        target_duration: f64,
        playlist_url: &Url,
        sync_tx: Option<&mpsc::Sender<SyncMessage>>,
        record_tx: Option<&mpsc::Sender<DownloadedSegment>>,
        token: &CancellationToken,
    ) {
        let fetch_url = match playlist_url.join(&segment.uri) {
            Ok(url) => url,
            Err(e) => {
                error!(uri = %segment.uri, error = %e, "Cannot resolve segment URL");
                return;
            }
        };
        segment.uri = self.name_for(&segment.uri, &segment.timestamp);
        if duplicate {
            return;
        }

        let data = match self.download(&fetch_url, token).await {
            Ok(data) => data,
            Err(e) => {
                error!(url = %fetch_url, error = %e, "Giving up on segment");
                return;
            }
        };
        debug!(url = %fetch_url, name = %segment.uri, bytes = data.len(), "Downloaded segment");

        let downloaded = DownloadedSegment {
            segment,
            data,
            target_duration,
        };
        if let Some(tx) = sync_tx
            && tx.send(SyncMessage::Segment(downloaded.clone())).await.is_err()
        {
            warn!("Sync sink is gone, dropping segment");
        }
        if let Some(tx) = record_tx
            && tx.send(downloaded).await.is_err()
        {
            warn!("Record engine is gone, dropping segment");
        }
    }
}
