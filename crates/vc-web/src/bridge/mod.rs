//! Socket bridge
//!
//! Relays an established console session to a message-oriented peer (a
//! browser websocket). Console output goes out as binary payload frames,
//! lifecycle notices as text status frames. Two relay tasks run per
//! connection; whichever of them, the console stream or the interrupt
//! resolves first decides the outcome, and closing the session's pipes
//! unblocks whatever is left.

pub mod peer;
pub mod ws;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use vc_core::{
    ConsoleProvider, ConsoleSession, ConsoleTarget, PipeReader, PipeWriter, Termination,
    BUFFER_SIZE, ESCAPE_SEQUENCE_CODE,
};

pub use peer::{PeerError, PeerFrame, PeerSink, PeerSource};

/// Status sent once the console stream is open
pub const STATUS_READY: &str = "serial console ready";

/// Upper bound on sending the final status and closing the peer
const PEER_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Open the console of `target` and bridge it to the peer.
///
/// `shutdown` interrupts both establishment and the relay. Establishment
/// failures are reported to the peer before the connection is closed.
pub async fn serve_console<S, R>(
    provider: Arc<dyn ConsoleProvider>,
    target: ConsoleTarget,
    timeout: Duration,
    mut sink: S,
    source: R,
    shutdown: &CancellationToken,
) -> Termination
where
    S: PeerSink + 'static,
    R: PeerSource + 'static,
{
    match ConsoleSession::establish(provider, target, timeout, shutdown).await {
        Ok(session) => run_socket(session, sink, source, shutdown).await,
        Err(termination) => {
            if let Some(status) = failure_status(&termination) {
                if let Err(e) = sink.send_status(&status).await {
                    tracing::warn!("Failed to send status to websocket: {}", e);
                }
            }
            if let Err(e) = sink.close().await {
                tracing::debug!("Failed to close websocket: {}", e);
            }
            termination
        }
    }
}

/// Bridge an established session to the peer until the first termination
/// signal.
pub async fn run_socket<S, R>(
    session: ConsoleSession,
    sink: S,
    source: R,
    interrupt: &CancellationToken,
) -> Termination
where
    S: PeerSink + 'static,
    R: PeerSource + 'static,
{
    let target = session.target().clone();
    let (pipes, remote) = session.into_parts();
    let sink = Arc::new(Mutex::new(sink));
    let shutdown = interrupt.child_token();

    if let Err(e) = sink.lock().await.send_status(STATUS_READY).await {
        tracing::warn!(vmi = %target, "Failed to send ready status: {}", e);
    }

    // Nudge the console into printing its prompt
    if let Err(e) = pipes.inbound_writer.write(b"\r").await {
        tracing::warn!(vmi = %target, "Failed to write to console: {}", e);
    }

    let mut outbound = tokio::spawn(outbound_loop(
        pipes.outbound_reader.clone(),
        Arc::clone(&sink),
    ));
    let mut inbound = tokio::spawn(inbound_loop(
        source,
        pipes.inbound_writer.clone(),
        shutdown.clone(),
    ));

    let termination = tokio::select! {
        biased;
        t = remote.wait() => t,
        _ = interrupt.cancelled() => Termination::UserInterrupt,
        t = &mut outbound => joined(t),
        t = &mut inbound => joined(t),
    };
    tracing::debug!(vmi = %target, "Socket bridge finished: {}", termination);

    pipes.close();
    shutdown.cancel();
    // A send stalled on the peer holds the sink lock; closing the pipes
    // cannot release it
    outbound.abort();

    let status = failure_status(&termination);
    if let Some(status) = &status {
        tracing::warn!(vmi = %target, "{}", status);
    }
    let closing = async {
        let mut sink = sink.lock().await;
        if let Some(status) = &status {
            if let Err(e) = sink.send_status(status).await {
                tracing::warn!(vmi = %target, "Failed to send status to websocket: {}", e);
            }
        }
        if let Err(e) = sink.close().await {
            tracing::debug!(vmi = %target, "Failed to close websocket: {}", e);
        }
    };
    if tokio::time::timeout(PEER_CLOSE_TIMEOUT, closing).await.is_err() {
        tracing::warn!(vmi = %target, "Timed out closing websocket, dropping it");
    }

    termination
}

/// Status text describing a non-clean termination
pub fn failure_status(termination: &Termination) -> Option<String> {
    match termination {
        Termination::RemoteStream(e) => Some(format!("serial console error: {}", e)),
        Termination::LocalIo(e) => Some(format!("console connection error: {}", e)),
        _ => None,
    }
}

fn joined(result: Result<Termination, JoinError>) -> Termination {
    result.unwrap_or_else(|e| {
        Termination::LocalIo(io::Error::other(format!("bridge task failed: {}", e)))
    })
}

/// Console output to the peer
async fn outbound_loop<S: PeerSink>(output: PipeReader, sink: Arc<Mutex<S>>) -> Termination {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = output.read(&mut buf).await;
        if n == 0 {
            return Termination::RemoteClosed;
        }

        let data = Bytes::copy_from_slice(&buf[..n]);
        if let Err(e) = sink.lock().await.send_payload(data).await {
            return Termination::LocalIo(io::Error::other(format!(
                "send to websocket failed: {}",
                e
            )));
        }
    }
}

/// Peer input to the console
async fn inbound_loop<R: PeerSource>(
    mut source: R,
    input: PipeWriter,
    shutdown: CancellationToken,
) -> Termination {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Termination::UserInterrupt,
            frame = source.recv() => frame,
        };

        let data = match frame {
            Ok(PeerFrame::Text(text)) => Bytes::from(text),
            Ok(PeerFrame::Binary(data)) => data,
            Ok(PeerFrame::Control) => continue,
            Err(e) if e.is_clean_close() => return Termination::RemoteClosed,
            Err(e) => return Termination::LocalIo(io::Error::other(e)),
        };

        // Only a frame holding nothing but the escape byte disconnects
        if data.len() == 1 && data[0] == ESCAPE_SEQUENCE_CODE {
            return Termination::EscapeSequence;
        }

        if input.write(&data).await.is_err() {
            return Termination::RemoteClosed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vc_core::{ConsoleError, ProviderError, StreamError};

    #[test]
    fn test_failure_status_texts() {
        let establish = Termination::from(ConsoleError::Establish(ProviderError::NotFound(
            "demo/vm-01".into(),
        )));
        assert_eq!(
            failure_status(&establish).as_deref(),
            Some("serial console error: virtual machine instance not found: demo/vm-01")
        );

        let local = Termination::LocalIo(io::Error::other(PeerError::Closed(1011)));
        assert_eq!(
            failure_status(&local).as_deref(),
            Some("console connection error: websocket closed with code 1011")
        );

        let abnormal = Termination::from(ConsoleError::Stream(StreamError::AbnormalClosure));
        assert!(failure_status(&abnormal).unwrap().starts_with("serial console error: "));
    }

    #[test]
    fn test_clean_terminations_have_no_status() {
        assert!(failure_status(&Termination::UserInterrupt).is_none());
        assert!(failure_status(&Termination::EscapeSequence).is_none());
        assert!(failure_status(&Termination::RemoteClosed).is_none());
    }
}
