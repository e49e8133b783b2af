//! Why a bridge stopped

use std::fmt;

use crate::error::{ConsoleError, StreamError};

/// Byte that asks the bridge to disconnect (Ctrl+])
pub const ESCAPE_SEQUENCE_CODE: u8 = 29;

/// Chunk size used by every relay loop
pub const BUFFER_SIZE: usize = 1024;

/// The single signal that ends a bridge invocation
#[derive(Debug)]
pub enum Termination {
    /// External interrupt (Ctrl+C, server shutdown)
    UserInterrupt,
    /// The escape byte was received from the local endpoint
    EscapeSequence,
    /// The console stream ended cleanly
    RemoteClosed,
    /// Local input reached end of file
    LocalInputClosed,
    /// Reading or writing the local endpoint failed
    LocalIo(std::io::Error),
    /// The console could not be opened, or failed once open
    RemoteStream(ConsoleError),
}

/// Payload-free tag of a [`Termination`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationKind {
    UserInterrupt,
    EscapeSequence,
    RemoteClosed,
    LocalInputClosed,
    LocalIo,
    RemoteStream,
}

impl Termination {
    /// Tag without payload, handy for logging and assertions
    pub fn kind(&self) -> TerminationKind {
        match self {
            Termination::UserInterrupt => TerminationKind::UserInterrupt,
            Termination::EscapeSequence => TerminationKind::EscapeSequence,
            Termination::RemoteClosed => TerminationKind::RemoteClosed,
            Termination::LocalInputClosed => TerminationKind::LocalInputClosed,
            Termination::LocalIo(_) => TerminationKind::LocalIo,
            Termination::RemoteStream(_) => TerminationKind::RemoteStream,
        }
    }

    /// Interrupt, escape and an orderly close of either side are not failures
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            Termination::UserInterrupt
                | Termination::EscapeSequence
                | Termination::RemoteClosed
                | Termination::LocalInputClosed
        )
    }

    /// The console went away without a closing handshake
    pub fn is_abnormal_closure(&self) -> bool {
        matches!(
            self,
            Termination::RemoteStream(ConsoleError::Stream(StreamError::AbnormalClosure))
        )
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::UserInterrupt => write!(f, "interrupted"),
            Termination::EscapeSequence => write!(f, "disconnected by escape sequence"),
            Termination::RemoteClosed => write!(f, "console connection closed"),
            Termination::LocalInputClosed => write!(f, "local input closed"),
            Termination::LocalIo(e) => write!(f, "local I/O error: {}", e),
            Termination::RemoteStream(e) => write!(f, "{}", e),
        }
    }
}

impl From<ConsoleError> for Termination {
    fn from(err: ConsoleError) -> Self {
        Termination::RemoteStream(err)
    }
}
