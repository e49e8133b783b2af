//! Console command implementation

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use vc_core::config::ConsoleConfig;
use vc_core::{ConsoleProvider, ConsoleTarget, Termination};

use crate::output::{print_error, termination_report};
use crate::terminal::{self, CrosstermRawMode, TerminalIo};

/// Namespace for the console command: the flag, then the config file
pub fn resolve_namespace(flag: Option<&str>, config: &ConsoleConfig) -> Result<String> {
    flag.map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(String::from)
        .or_else(|| config.namespace.clone())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "namespace is required (pass --namespace or set one in the config file)"
            )
        })
}

/// Execute the console command - attach this terminal to the VMI's console
pub async fn console_command(
    provider: Arc<dyn ConsoleProvider>,
    target: ConsoleTarget,
    timeout: Duration,
    interrupt: &CancellationToken,
) -> Termination {
    tracing::info!(vmi = %target, "Connecting to serial console");

    let io = TerminalIo {
        input: tokio::io::stdin(),
        output: tokio::io::stdout(),
        status: tokio::io::stderr(),
    };
    let mut raw_mode = CrosstermRawMode;
    let termination =
        terminal::attach(provider, target, timeout, io, &mut raw_mode, interrupt).await;

    if let Some(report) = termination_report(&termination) {
        if termination.is_abnormal_closure() {
            eprint!("{}", report);
        } else {
            print_error(&report);
        }
    }
    termination
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_flag_wins() {
        let config = ConsoleConfig {
            namespace: Some("from-config".into()),
            ..Default::default()
        };
        assert_eq!(resolve_namespace(Some("demo"), &config).unwrap(), "demo");
        assert_eq!(resolve_namespace(None, &config).unwrap(), "from-config");
        assert_eq!(resolve_namespace(Some(" "), &config).unwrap(), "from-config");
    }

    #[test]
    fn test_namespace_required() {
        let err = resolve_namespace(None, &ConsoleConfig::default()).unwrap_err();
        assert!(err.to_string().starts_with("namespace is required"));
    }
}
