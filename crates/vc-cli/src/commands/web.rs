//! Web command implementation

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use vc_core::config::ConsoleConfig;
use vc_core::ConsoleProvider;
use vc_web::{ServerSettings, WebServer, WebState};

/// Target selection for the web server from flags and the config file
pub fn web_settings(
    timeout: Duration,
    namespace: Option<String>,
    vmi: Option<String>,
    config: &ConsoleConfig,
) -> Result<ServerSettings> {
    let settings = ServerSettings::new(
        timeout,
        config.namespace.clone(),
        namespace.or_else(|| config.web.namespace.clone()),
        vmi.or_else(|| config.web.vmi.clone()),
    )?;
    Ok(settings)
}

/// Execute the web command - serve the browser console until shutdown
pub async fn web_command(
    provider: Arc<dyn ConsoleProvider>,
    settings: ServerSettings,
    listen: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    if let (Some(namespace), Some(vmi)) = (&settings.fixed_namespace, &settings.fixed_vmi) {
        tracing::info!("Dedicated console for {}/{}", namespace, vmi);
    }

    let state = WebState::new(provider, settings, shutdown);
    WebServer::new(listen, state)
        .run()
        .await
        .context("Web console server failed")
}
