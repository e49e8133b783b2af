//! Session establishment
//!
//! Opening a console can take minutes (the VM may still be starting), so it
//! runs in its own task and races an interrupt. Once the provider hands back
//! a stream, the same task keeps relaying it through the session's
//! [`PipePair`] and reports how the stream ended through [`RemoteOutcome`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{ConsoleError, ProviderError, StreamError};
use crate::pipe::PipePair;
use crate::provider::ConsoleProvider;
use crate::termination::Termination;
use crate::types::ConsoleTarget;

/// An established console session
///
/// Owns the pipe pair wired to the console stream. A session must either be
/// handed to a bridge or [`close`](ConsoleSession::close)d.
pub struct ConsoleSession {
    target: ConsoleTarget,
    pipes: PipePair,
    remote: RemoteOutcome,
}

impl ConsoleSession {
    /// Open the console of `target`, unless `interrupt` fires first.
    ///
    /// The provider call is not cancelled on interrupt; if it succeeds later
    /// the stream is dropped without being relayed.
    pub async fn establish(
        provider: Arc<dyn ConsoleProvider>,
        target: ConsoleTarget,
        timeout: Duration,
        interrupt: &CancellationToken,
    ) -> Result<Self, Termination> {
        let pipes = PipePair::new();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), ProviderError>>();
        let (done_tx, done_rx) = oneshot::channel();

        let input = pipes.inbound_reader.clone();
        let output = pipes.outbound_writer.clone();
        let task_target = target.clone();
        tokio::spawn(async move {
            let stream = match provider.open(&task_target, timeout).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if ready_tx.send(Ok(())).is_err() {
                tracing::debug!(vmi = %task_target, "console opened after establishment was abandoned, dropping it");
                return;
            }

            let result = stream.relay(input.clone(), output.clone()).await;
            let _ = done_tx.send(result);
            // Nothing consumes or produces console bytes any more
            input.close();
            output.close();
        });

        tokio::select! {
            biased;
            _ = interrupt.cancelled() => {
                tracing::debug!(vmi = %target, "interrupted while establishing the console");
                pipes.close();
                Err(Termination::UserInterrupt)
            }
            ready = ready_rx => match ready {
                Ok(Ok(())) => {
                    tracing::info!(vmi = %target, "serial console stream established");
                    Ok(Self {
                        target,
                        pipes,
                        remote: RemoteOutcome { done: done_rx },
                    })
                }
                Ok(Err(e)) => {
                    tracing::warn!(vmi = %target, error = %e, "failed to establish serial console");
                    pipes.close();
                    Err(Termination::RemoteStream(ConsoleError::Establish(e)))
                }
                Err(_) => {
                    pipes.close();
                    Err(Termination::RemoteStream(ConsoleError::Establish(
                        ProviderError::Transport("console provider task ended unexpectedly".into()),
                    )))
                }
            }
        }
    }

    /// The VMI this session is attached to
    pub fn target(&self) -> &ConsoleTarget {
        &self.target
    }

    /// Pipes wired to the console stream
    pub fn pipes(&self) -> &PipePair {
        &self.pipes
    }

    /// Split into the pipes and the stream's own termination signal
    pub fn into_parts(self) -> (PipePair, RemoteOutcome) {
        (self.pipes, self.remote)
    }

    /// Tear the session down without running a bridge
    pub fn close(self) {
        self.pipes.close();
    }
}

/// Resolves once the console stream stops relaying
pub struct RemoteOutcome {
    done: oneshot::Receiver<Result<(), StreamError>>,
}

impl RemoteOutcome {
    /// Wait for the stream to end and classify how it ended
    pub async fn wait(self) -> Termination {
        match self.done.await {
            Ok(Ok(())) => Termination::RemoteClosed,
            Ok(Err(e)) => Termination::RemoteStream(ConsoleError::Stream(e)),
            Err(_) => Termination::RemoteStream(ConsoleError::Stream(StreamError::Transport(
                "console relay task ended unexpectedly".into(),
            ))),
        }
    }
}
