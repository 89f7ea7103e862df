use std::sync::OnceLock;

use reqwest::Client;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Builds the client shared by the poller and the fetcher.
pub fn create_client(config: &SyncConfig) -> Result<Client> {
    install_rustls_provider();

    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(10))
        .pool_max_idle_per_host(4);

    if config.timeout > 0 {
        builder = builder.timeout(config.request_timeout());
    }

    builder
        .build()
        .map_err(|e| SyncError::network("client builder", e))
}
