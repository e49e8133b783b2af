//! Web server state and console target resolution

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use vc_core::{ConsoleProvider, ConsoleTarget, ServerMode};

/// Settings that cannot be turned into a running server
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("namespace is required when --vmi is specified and no default namespace is available")]
    NamespaceRequired,
}

/// Why a console request does not name a usable target
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    #[error("vmi query parameter is required")]
    MissingVmi,

    #[error("namespace cannot be determined")]
    UnknownNamespace,
}

/// Namespace and VMI selection for console requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Connection timeout for each console
    pub timeout: Duration,
    /// Namespace of the cluster context
    pub default_namespace: Option<String>,
    /// Namespace preselected for shared-mode requests
    pub initial_namespace: Option<String>,
    /// Namespace of the dedicated VMI
    pub fixed_namespace: Option<String>,
    /// VMI served in dedicated mode
    pub fixed_vmi: Option<String>,
}

impl ServerSettings {
    /// Build settings from the configured namespaces.
    ///
    /// `namespace` falls back to `default_namespace`. Giving `vmi` switches
    /// to dedicated mode, which needs one of the two.
    pub fn new(
        timeout: Duration,
        default_namespace: Option<String>,
        namespace: Option<String>,
        vmi: Option<String>,
    ) -> Result<Self, SettingsError> {
        let default_namespace = non_empty(default_namespace);
        let initial_namespace = non_empty(namespace).or_else(|| default_namespace.clone());
        let fixed_vmi = non_empty(vmi);

        let fixed_namespace = match fixed_vmi {
            Some(_) => Some(
                initial_namespace
                    .clone()
                    .ok_or(SettingsError::NamespaceRequired)?,
            ),
            None => None,
        };

        Ok(Self {
            timeout,
            default_namespace,
            initial_namespace,
            fixed_namespace,
            fixed_vmi,
        })
    }

    pub fn mode(&self) -> ServerMode {
        if self.fixed_vmi.is_some() {
            ServerMode::Dedicated
        } else {
            ServerMode::Shared
        }
    }

    /// Namespace used for a request asking for `requested`
    pub fn resolved_namespace(&self, requested: Option<&str>) -> Option<String> {
        if self.fixed_vmi.is_some() {
            return self
                .fixed_namespace
                .clone()
                .or_else(|| self.default_namespace.clone());
        }
        requested
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(String::from)
            .or_else(|| self.initial_namespace.clone())
            .or_else(|| self.default_namespace.clone())
    }

    /// Console target for a request's query parameters.
    ///
    /// In dedicated mode the query is ignored.
    pub fn resolve_target(
        &self,
        namespace: Option<&str>,
        vmi: Option<&str>,
    ) -> Result<ConsoleTarget, TargetError> {
        let vmi = match &self.fixed_vmi {
            Some(fixed) => fixed.clone(),
            None => vmi
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .ok_or(TargetError::MissingVmi)?,
        };
        let namespace = self
            .resolved_namespace(namespace)
            .ok_or(TargetError::UnknownNamespace)?;
        Ok(ConsoleTarget::new(namespace, vmi))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Shared state of the web server
#[derive(Clone)]
pub struct WebState {
    /// Opens consoles for every connection
    pub provider: Arc<dyn ConsoleProvider>,
    /// Target selection
    pub settings: Arc<ServerSettings>,
    /// Cancelled when the server shuts down
    pub shutdown: CancellationToken,
}

impl WebState {
    pub fn new(
        provider: Arc<dyn ConsoleProvider>,
        settings: ServerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            settings: Arc::new(settings),
            shutdown,
        }
    }
}
