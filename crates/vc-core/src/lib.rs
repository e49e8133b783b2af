//! vc-core: Core abstractions for kubevirt-console
//!
//! This crate provides the pieces shared by the terminal and web bridges:
//! configuration, error types, the duplex pipe pair, console providers,
//! session establishment and the termination signal.

pub mod config;
pub mod error;
pub mod pipe;
pub mod provider;
pub mod session;
pub mod termination;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{ConfigError, ConsoleError, PipeError, ProviderError, StreamError};
pub use pipe::{pipe, PipePair, PipeReader, PipeWriter};
pub use provider::{ConsoleProvider, ConsoleStream, KubevirtProvider};
pub use session::{ConsoleSession, RemoteOutcome};
pub use termination::{Termination, TerminationKind, BUFFER_SIZE, ESCAPE_SEQUENCE_CODE};
pub use types::{ConsoleTarget, ServerMode};
