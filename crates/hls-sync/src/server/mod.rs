//! HTTP time-shift service.
//!
//! Every request, whatever its path, is answered from the recorded index
//! buckets. The time range comes from the query string.

mod error;
mod timeshift;

pub use error::TimeshiftError;
pub use timeshift::{MPEGURL, TimeRange, TimeshiftQuery, build_playlist, serve_playlist};

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::RenderCache;
use crate::config::{ConfigError, ListenAddr, SyncConfig};
use crate::error::{Result, SyncError};

#[derive(Clone)]
pub struct TimeshiftState {
    pub config: Arc<SyncConfig>,
    pub tz: Tz,
    pub cache: RenderCache,
}

impl TimeshiftState {
    pub fn new(config: Arc<SyncConfig>) -> Result<Self, ConfigError> {
        let tz = config.timezone()?;
        let cache = RenderCache::new(
            config.http.cache_num,
            Duration::from_secs(config.http.cache_valid),
        );
        Ok(Self { config, tz, cache })
    }
}

pub fn router(state: TimeshiftState) -> Router {
    Router::new().fallback(serve_playlist).with_state(state)
}

/// Serves `router` on `listen` until `token` is cancelled.
pub async fn serve(router: Router, listen: &ListenAddr, token: CancellationToken) -> Result<()> {
    let shutdown = async move {
        token.cancelled().await;
        info!("Time-shift server shutting down");
    };

    match listen {
        ListenAddr::Tcp(addr) => {
            let listener = tokio::net::TcpListener::bind(addr.as_str())
                .await
                .map_err(|e| SyncError::io("bind", addr, e))?;
            info!("Time-shift server listening on http://{addr}");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(|e| SyncError::io("serve", addr, e))
        }
        #[cfg(unix)]
        ListenAddr::Unix(path) => {
            use std::os::unix::fs::PermissionsExt;

            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::io("remove stale socket", path, e)),
            }
            let listener =
                tokio::net::UnixListener::bind(path).map_err(|e| SyncError::io("bind", path, e))?;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
                .await
                .map_err(|e| SyncError::io("chmod socket", path, e))?;
            info!(path = %path.display(), "Time-shift server listening on unix socket");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(|e| SyncError::io("serve", path, e))
        }
        #[cfg(not(unix))]
        ListenAddr::Unix(path) => Err(SyncError::io(
            "bind",
            path,
            std::io::Error::new(std::io::ErrorKind::Unsupported, "unix sockets are unavailable"),
        )),
    }
}

/// Builds the state and serves until cancelled.
pub async fn run(config: Arc<SyncConfig>, token: CancellationToken) -> Result<()> {
    let listen = ListenAddr::parse(&config.http.listen)?;
    let state = TimeshiftState::new(config)?;
    serve(router(state), &listen, token).await
}
