//! Wires the pipeline stages together and runs them to completion.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::create_client;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fetcher::SegmentFetcher;
use crate::poller::PlaylistPoller;
use crate::record::RecordEngine;
use crate::server;
use crate::sync::SyncSink;

/// Capacity of every inter-stage channel.
pub const CHANNEL_CAPACITY: usize = 20;

/// Handles of the spawned stages.
pub struct PipelineHandles {
    pub poller: JoinHandle<()>,
    pub fetcher: JoinHandle<()>,
    pub sinks: Vec<JoinHandle<()>>,
    pub server: Option<JoinHandle<Result<()>>>,
}

pub struct HlsSynchronizer {
    config: Arc<SyncConfig>,
}

impl HlsSynchronizer {
    /// Validates `config`. Nothing is spawned until [`HlsSynchronizer::run`].
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Spawns every enabled stage. Cancelling `token` stops the poller and the
    /// HTTP service; the remaining stages drain once their inputs close.
    pub fn spawn(&self, token: CancellationToken) -> Result<PipelineHandles> {
        let config = &self.config;
        let client = create_client(config)?;

        let poller = PlaylistPoller::new(Arc::clone(config), client.clone())?;
        let fetcher = SegmentFetcher::new(config, client)?;

        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut sinks = Vec::new();

        let sync_tx = if config.sync.enabled {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            let sink = SyncSink::new(config);
            sinks.push(tokio::spawn(sink.run(rx)));
            Some(tx)
        } else {
            None
        };

        let record_tx = if config.record.enabled {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            let engine = RecordEngine::new(config)?;
            sinks.push(tokio::spawn(engine.run(rx)));
            Some(tx)
        } else {
            None
        };

        let fetcher = tokio::spawn(fetcher.run(event_rx, sync_tx, record_tx, token.clone()));
        let poller = tokio::spawn(poller.run(event_tx, token.clone()));

        let server = config.http.enabled.then(|| {
            let config = Arc::clone(config);
            let token = token.clone();
            tokio::spawn(async move {
                let result = server::run(config, token.clone()).await;
                if let Err(e) = &result {
                    error!(error = %e, "Time-shift server failed, stopping pipeline");
                    token.cancel();
                }
                result
            })
        });

        info!(
            sync = config.sync.enabled,
            record = config.record.enabled,
            http = config.http.enabled,
            "Pipeline started"
        );
        Ok(PipelineHandles {
            poller,
            fetcher,
            sinks,
            server,
        })
    }

    /// Runs until `token` is cancelled and every stage has drained.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let handles = self.spawn(token)?;

        let mut stages = vec![handles.poller, handles.fetcher];
        stages.extend(handles.sinks);
        for joined in join_all(stages).await {
            if let Err(e) = joined {
                error!(error = %e, "Pipeline stage panicked");
            }
        }

        if let Some(server) = handles.server {
            match server.await {
                Ok(result) => result?,
                Err(e) => {
                    return Err(SyncError::Task {
                        stage: "http server",
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!("Pipeline stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, SourceOptions};
    use axum::Router;
    use axum::routing::get;
    use std::time::Duration;

    const PLAYLIST: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:1\n\
#EXT-X-PROGRAM-DATE-TIME:2024-03-09T10:00:00Z\n#EXTINF:1.000,\nseg1.ts\n\
#EXT-X-PROGRAM-DATE-TIME:2024-03-09T10:00:01Z\n#EXTINF:1.000,\nseg2.ts\n";

    async fn upstream() -> String {
        let app = Router::new()
            .route("/live/index.m3u8", get(|| async { PLAYLIST }))
            .route("/live/seg1.ts", get(|| async { "ONE" }))
            .route("/live/seg2.ts", get(|| async { "TWO" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/live/index.m3u8")
    }

    #[test]
    fn rejects_invalid_config() {
        let err = HlsSynchronizer::new(SyncConfig::default()).err().unwrap();
        assert!(matches!(err, SyncError::Config(ConfigError::NoSource)));
    }

    #[tokio::test]
    async fn mirrors_and_records_until_cancelled() {
        let sync_dir = tempfile::tempdir().unwrap();
        let record_dir = tempfile::tempdir().unwrap();

        let mut cfg = SyncConfig {
            source: SourceOptions {
                urls: vec![upstream().await],
            },
            ..Default::default()
        };
        cfg.sync.enabled = true;
        cfg.sync.output = sync_dir.path().to_path_buf();
        cfg.record.enabled = true;
        cfg.record.reindex = true;
        cfg.record.output = record_dir.path().to_path_buf();

        let synchronizer = HlsSynchronizer::new(cfg).unwrap();
        let token = CancellationToken::new();
        let run = tokio::spawn({
            let token = token.clone();
            async move { synchronizer.run(token).await }
        });

        let mirrored = sync_dir.path().join("live.m3u8");
        let recorded = record_dir.path().join("2024/03/09/10/live-0002.ts");
        for _ in 0..100 {
            if mirrored.exists() && recorded.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(std::fs::read(sync_dir.path().join("seg1.ts")).unwrap(), b"ONE");
        assert_eq!(std::fs::read(&recorded).unwrap(), b"TWO");

        token.cancel();
        run.await.unwrap().unwrap();

        let index = std::fs::read_to_string(record_dir.path().join("2024/03/09/10/index.m3u8")).unwrap();
        assert!(index.contains("live-0001.ts"));
        assert!(index.contains("#EXT-X-ENDLIST"));
    }
}
