//! In-memory console provider for tests
//!
//! [`ScriptedProvider`] stands in for the cluster. Every successful `open`
//! publishes a [`RemoteConsole`], the test's handle on the VM side of the
//! stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ProviderError, StreamError};
use crate::pipe::{PipeReader, PipeWriter};
use crate::provider::{ConsoleProvider, ConsoleStream};
use crate::termination::BUFFER_SIZE;
use crate::types::ConsoleTarget;

/// What `open` does
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    /// Open immediately
    Connect,
    /// Open after a delay
    ConnectAfter(Duration),
    /// Fail with the given error
    Fail(ProviderError),
    /// Never return
    Hang,
}

/// Console provider driven by the test
pub struct ScriptedProvider {
    behavior: OpenBehavior,
    consoles: mpsc::UnboundedSender<RemoteConsole>,
    opens: AtomicUsize,
}

impl ScriptedProvider {
    /// Provider with the given behavior, plus the receiver of opened consoles
    pub fn with_behavior(
        behavior: OpenBehavior,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteConsole>) {
        let (consoles, rx) = mpsc::unbounded_channel();
        let provider = Arc::new(Self {
            behavior,
            consoles,
            opens: AtomicUsize::new(0),
        });
        (provider, rx)
    }

    /// Provider whose consoles open immediately
    pub fn connecting() -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteConsole>) {
        Self::with_behavior(OpenBehavior::Connect)
    }

    /// Provider that always fails with `err`
    pub fn failing(err: ProviderError) -> Arc<Self> {
        Self::with_behavior(OpenBehavior::Fail(err)).0
    }

    /// Provider whose `open` never returns
    pub fn hanging() -> Arc<Self> {
        Self::with_behavior(OpenBehavior::Hang).0
    }

    /// Number of `open` calls so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn connect(&self, target: &ConsoleTarget) -> Box<dyn ConsoleStream> {
        let (to_local_tx, to_local_rx) = mpsc::unbounded_channel();
        let (from_local_tx, from_local_rx) = mpsc::unbounded_channel();
        let (finish_tx, finish_rx) = oneshot::channel();

        let _ = self.consoles.send(RemoteConsole {
            target: target.clone(),
            to_local: to_local_tx,
            from_local: from_local_rx,
            finish: finish_tx,
        });

        Box::new(ScriptedStream {
            to_local: to_local_rx,
            from_local: from_local_tx,
            finish: finish_rx,
        })
    }
}

#[async_trait]
impl ConsoleProvider for ScriptedProvider {
    async fn open(
        &self,
        target: &ConsoleTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn ConsoleStream>, ProviderError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            OpenBehavior::Connect => Ok(self.connect(target)),
            OpenBehavior::ConnectAfter(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(self.connect(target))
            }
            OpenBehavior::Fail(err) => Err(err.clone()),
            OpenBehavior::Hang => std::future::pending().await,
        }
    }
}

/// The VM side of a scripted console
///
/// Dropping it ends the stream as a clean remote close.
pub struct RemoteConsole {
    /// Target passed to `open`
    pub target: ConsoleTarget,
    to_local: mpsc::UnboundedSender<Bytes>,
    from_local: mpsc::UnboundedReceiver<Bytes>,
    finish: oneshot::Sender<Result<(), StreamError>>,
}

impl RemoteConsole {
    /// Emit console output towards the local endpoint
    pub fn send(&self, data: impl Into<Bytes>) {
        let _ = self.to_local.send(data.into());
    }

    /// Next chunk of input that reached the console, `None` once the
    /// stream stopped relaying
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.from_local.recv().await
    }

    /// Collect exactly `len` bytes of console input
    pub async fn recv_exact(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            match self.recv().await {
                Some(chunk) => out.extend_from_slice(&chunk),
                None => break,
            }
        }
        out
    }

    /// End the stream with `result`
    pub fn finish(self, result: Result<(), StreamError>) {
        let _ = self.finish.send(result);
    }
}

struct ScriptedStream {
    to_local: mpsc::UnboundedReceiver<Bytes>,
    from_local: mpsc::UnboundedSender<Bytes>,
    finish: oneshot::Receiver<Result<(), StreamError>>,
}

#[async_trait]
impl ConsoleStream for ScriptedStream {
    async fn relay(
        self: Box<Self>,
        input: PipeReader,
        output: PipeWriter,
    ) -> Result<(), StreamError> {
        let ScriptedStream {
            mut to_local,
            from_local,
            mut finish,
        } = *self;
        let mut buf = vec![0u8; BUFFER_SIZE];

        loop {
            tokio::select! {
                result = &mut finish => return result.unwrap_or(Ok(())),
                n = input.read(&mut buf) => {
                    if n == 0 {
                        return Ok(());
                    }
                    let _ = from_local.send(Bytes::copy_from_slice(&buf[..n]));
                }
                Some(data) = to_local.recv() => {
                    if output.write(&data).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
