use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use chrono_tz::Tz;
use m3u8_rs::MediaPlaylist;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::EvictingLru;
use crate::config::{ConfigError, SyncConfig};
use crate::error::{Result, SyncError};
use crate::events::{PipelineEvent, Segment};
use crate::playlist_io::decode_media;
use crate::timestamp::{Timestamp, TimestampResolver, normalize_program_dates};

/// Lower bound for the refresh interval when a source advertises a tiny target duration.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Ordered source URLs with a per-URL failure counter.
#[derive(Debug, Clone)]
pub struct SourceRotation {
    urls: Vec<String>,
    current: usize,
    failures: u32,
    limit: u32,
}

impl SourceRotation {
    pub fn new(urls: Vec<String>, limit: u32) -> Self {
        Self {
            urls,
            current: 0,
            failures: 0,
            limit: limit.max(1),
        }
    }

    pub fn current(&self) -> &str {
        &self.urls[self.current]
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Counts a failure and switches to the next URL, wrapping to the first,
    /// once the current one has failed `limit` times in a row.
    pub fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures >= self.limit && self.urls.len() > 1 {
            let previous = self.current;
            self.current = (self.current + 1) % self.urls.len();
            self.failures = 0;
            warn!(
                from = %self.urls[previous],
                to = %self.urls[self.current],
                "Switching playlist source"
            );
        }
    }
}

/// Result of processing one fetched playlist.
#[derive(Debug)]
pub struct PollRound {
    pub events: Vec<PipelineEvent>,
    pub new_segments: usize,
    pub target_duration: f64,
    pub closed: bool,
}

/// Polls the source playlist and turns it into timestamped segment events.
pub struct PlaylistPoller {
    config: Arc<SyncConfig>,
    client: Client,
    tz: Tz,
    sources: SourceRotation,
    resolver: TimestampResolver,
    seen: EvictingLru<String, Timestamp>,
    last_new_segment: Instant,
}

impl PlaylistPoller {
    pub fn new(config: Arc<SyncConfig>, client: Client) -> Result<Self, ConfigError> {
        if config.source.urls.is_empty() {
            return Err(ConfigError::NoSource);
        }
        Ok(Self {
            tz: config.timezone()?,
            resolver: TimestampResolver::from_config(&config)?,
            sources: SourceRotation::new(config.source.urls.clone(), config.attempts()),
            seen: EvictingLru::new(config.max_segments),
            last_new_segment: Instant::now(),
            client,
            config,
        })
    }

    pub fn current_source(&self) -> &str {
        self.sources.current()
    }

    async fn fetch_playlist(&self, url: &str) -> Result<(MediaPlaylist, Url)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::network(url, e))?;
        if !response.status().is_success() {
            return Err(SyncError::http_status(response.status(), url));
        }
        let final_url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::network(url, e))?;

        let text = String::from_utf8_lossy(&body);
        let normalized = normalize_program_dates(&text, &self.config.program_time_format, self.tz);
        let playlist = decode_media(normalized.as_bytes(), url)?;
        Ok((playlist, final_url))
    }

    /// Fetches the current source once and processes the result.
    pub async fn poll_once(&mut self) -> Result<PollRound> {
        let url = self.sources.current().to_string();
        let (playlist, final_url) = self.fetch_playlist(&url).await?;
        Ok(self.process(playlist, final_url))
    }

    /// Assigns timestamps, deduplicates, and builds the events for one round.
    pub fn process(&mut self, playlist: MediaPlaylist, playlist_url: Url) -> PollRound {
        let emit_segments = self.config.sync.enabled || self.config.record.enabled;
        let target_duration = playlist.target_duration as f64;
        let playlist_url = Arc::new(playlist_url);
        let mut events = Vec::new();
        let mut timestamps = Vec::with_capacity(playlist.segments.len());
        let mut new_segments = 0;

        self.resolver.begin_round(Local::now().fixed_offset());

        for (i, seg) in playlist.segments.iter().enumerate() {
            let duration = f64::from(seg.duration);
            let cached = self.seen.get(&seg.uri).copied();
            let duplicate = cached.is_some();
            let timestamp = match cached {
                Some(ts) => {
                    self.resolver.observe_known(ts, duration);
                    ts
                }
                None => {
                    let ts = self.resolver.resolve(seg);
                    self.seen.insert(seg.uri.clone(), ts);
                    self.last_new_segment = Instant::now();
                    new_segments += 1;
                    info!(
                        sequence = playlist.media_sequence + i as u64,
                        uri = %seg.uri,
                        duration,
                        timestamp = %ts,
                        "New segment"
                    );
                    ts
                }
            };
            timestamps.push(timestamp);

            if emit_segments {
                events.push(PipelineEvent::Segment {
                    segment: Segment {
                        uri: seg.uri.clone(),
                        duration,
                        timestamp,
                        sequence: playlist.media_sequence + i as u64,
                        title: seg.uri.clone(),
                    },
                    duplicate,
                    target_duration,
                    playlist_url: Arc::clone(&playlist_url),
                });
            }
        }

        let stall = Duration::from_secs_f64(target_duration * playlist.segments.len() as f64);
        if !playlist.segments.is_empty() && self.last_new_segment.elapsed() >= stall {
            warn!(
                source = %playlist_url,
                idle_secs = self.last_new_segment.elapsed().as_secs(),
                "No new segment for a long time, check stream continuity"
            );
        }

        let closed = playlist.end_list;
        if self.config.sync.enabled && new_segments > 0 {
            events.push(PipelineEvent::Playlist {
                playlist: Arc::new(playlist),
                timestamps: timestamps.into(),
            });
        }

        PollRound {
            events,
            new_segments,
            target_duration,
            closed,
        }
    }

    async fn forward(
        events: Vec<PipelineEvent>,
        tx: &mpsc::Sender<PipelineEvent>,
        token: &CancellationToken,
    ) -> bool {
        for event in events {
            tokio::select! {
                _ = token.cancelled() => return false,
                sent = tx.send(event) => if sent.is_err() {
                    return false;
                },
            }
        }
        true
    }

    /// Polls until cancelled or until the fetcher goes away. Dropping `tx` on
    /// return closes the pipeline.
    pub async fn run(mut self, tx: mpsc::Sender<PipelineEvent>, token: CancellationToken) {
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
        info!(source = %self.sources.current(), "Playlist poller started");

        loop {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = self.poll_once() => result,
            };

            let delay = match result {
                Ok(round) => {
                    debug!(
                        new = round.new_segments,
                        target_duration = round.target_duration,
                        "Playlist processed"
                    );
                    let closed = round.closed;
                    let refresh = Duration::from_secs_f64(round.target_duration / 2.0)
                        .max(MIN_REFRESH_INTERVAL);
                    if !Self::forward(round.events, &tx, &token).await {
                        break;
                    }
                    if closed {
                        error!(source = %self.sources.current(), "Live playlist unexpectedly closed");
                        self.sources.record_failure();
                        retry_delay
                    } else {
                        self.sources.record_success();
                        refresh
                    }
                }
                Err(e) => {
                    error!(source = %self.sources.current(), error = %e, "Failed to refresh playlist");
                    self.sources.record_failure();
                    retry_delay
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Playlist poller stopped");
    }
}
