//! Console providers
//!
//! A provider opens the duplex byte stream of a VMI serial console. The
//! bridges never talk to the cluster themselves; they only see the
//! [`ConsoleStream`] handed back by [`ConsoleProvider::open`], which is wired
//! to a [`PipePair`](crate::pipe::PipePair) during session establishment.

mod kubevirt;

pub use kubevirt::{KubevirtProvider, PLAIN_SUBPROTOCOL};

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{ProviderError, StreamError};
use crate::pipe::{PipeReader, PipeWriter};
use crate::types::ConsoleTarget;

/// Opens serial console streams.
///
/// Implementations must support concurrent, independent calls; each call
/// yields its own stream.
#[async_trait]
pub trait ConsoleProvider: Send + Sync {
    /// Open the console of `target`, waiting at most `timeout` for it to
    /// become available
    async fn open(
        &self,
        target: &ConsoleTarget,
        timeout: Duration,
    ) -> Result<Box<dyn ConsoleStream>, ProviderError>;
}

/// An open console stream
#[async_trait]
pub trait ConsoleStream: Send {
    /// Relay bytes read from `input` to the console and bytes from the
    /// console into `output`, until either side finishes.
    ///
    /// Returns `Ok(())` when the console closed cleanly or `input` reached
    /// end of stream.
    async fn relay(self: Box<Self>, input: PipeReader, output: PipeWriter)
        -> Result<(), StreamError>;
}
