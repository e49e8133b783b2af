//! kubevirt-console configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration;
use crate::error::ConfigError;

/// Default timeout for establishing a console connection
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default address for the web console
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Timeout for establishing the console connection
    #[serde(with = "duration")]
    pub timeout: Duration,

    /// Namespace used when none is given on the command line
    pub namespace: Option<String>,

    /// Cluster endpoint and credentials
    pub cluster: ClusterConfig,

    /// Web console settings
    pub web: WebConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            namespace: None,
            cluster: ClusterConfig::default(),
            web: WebConfig::default(),
        }
    }
}

/// Kubernetes API server access
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// API server URL, e.g. `https://10.0.0.1:6443`
    pub server: Option<String>,

    /// Bearer token
    pub token: Option<String>,

    /// File holding the bearer token (read when `token` is unset)
    pub token_file: Option<PathBuf>,

    /// Accept any server certificate
    pub insecure_skip_tls_verify: bool,
}

impl ClusterConfig {
    /// Resolve the bearer token, reading `token_file` if needed
    pub fn resolve_token(&self) -> Result<Option<String>, ConfigError> {
        if let Some(token) = &self.token {
            return Ok(Some(token.clone()));
        }
        match &self.token_file {
            Some(path) => {
                let token = std::fs::read_to_string(path).map_err(|e| {
                    ConfigError::Invalid(format!("Failed to read token file {:?}: {}", path, e))
                })?;
                Ok(Some(token.trim().to_string()))
            }
            None => Ok(None),
        }
    }
}

/// Web console settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Address to serve the web console on
    pub listen: String,

    /// Initial namespace offered to browsers
    pub namespace: Option<String>,

    /// Serve a dedicated console for this VMI only
    pub vmi: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDRESS.to_string(),
            namespace: None,
            vmi: None,
        }
    }
}
