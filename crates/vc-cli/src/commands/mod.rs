//! CLI command implementations

mod console;
mod web;

use std::sync::Arc;

use anyhow::{Context, Result};

use vc_core::config::ConsoleConfig;
use vc_core::{ConsoleProvider, KubevirtProvider};

pub use console::{console_command, resolve_namespace};
pub use web::{web_command, web_settings};

/// Cluster connection flags given on the command line
#[derive(Debug, Clone, Default)]
pub struct ClusterOptions {
    pub server: Option<String>,
    pub token: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

/// Build the KubeVirt console provider from flags, falling back to the
/// config file
pub fn build_provider(
    options: &ClusterOptions,
    config: &ConsoleConfig,
) -> Result<Arc<dyn ConsoleProvider>> {
    let server = options
        .server
        .clone()
        .or_else(|| config.cluster.server.clone())
        .context("cluster server is required (pass --server or set [cluster] server in the config file)")?;

    let token = match &options.token {
        Some(token) => Some(token.clone()),
        None => config
            .cluster
            .resolve_token()
            .context("Failed to resolve cluster token")?,
    };

    let insecure = options.insecure_skip_tls_verify || config.cluster.insecure_skip_tls_verify;
    if insecure {
        tracing::warn!("TLS certificate verification is disabled");
    }

    tracing::debug!("Using cluster server {}", server);
    Ok(Arc::new(
        KubevirtProvider::new(server)
            .with_token(token)
            .insecure_skip_tls_verify(insecure),
    ))
}
