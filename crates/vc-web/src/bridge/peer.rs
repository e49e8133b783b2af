//! Message-oriented peer connection seen by the socket bridge

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (tab closed, navigation)
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close frame without a status code
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// A frame received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Bytes),
    /// Ping, pong and other frames without console payload
    Control,
}

/// Peer connection failures
#[derive(Error, Debug)]
pub enum PeerError {
    /// The peer closed the connection (or it dropped, see [`CLOSE_ABNORMAL`])
    #[error("websocket closed with code {0}")]
    Closed(u16),

    /// Transport failure
    #[error("websocket transport error: {0}")]
    Transport(String),
}

impl PeerError {
    /// Normal and going-away closes are an orderly disconnect
    pub fn is_clean_close(&self) -> bool {
        matches!(self, PeerError::Closed(CLOSE_NORMAL | CLOSE_GOING_AWAY))
    }
}

/// Sending half of a peer connection
///
/// Status notices and console payload use distinct framing so the peer can
/// tell them apart.
#[async_trait]
pub trait PeerSink: Send {
    /// Send a human-readable status notice
    async fn send_status(&mut self, text: &str) -> Result<(), PeerError>;

    /// Send raw console output
    async fn send_payload(&mut self, data: Bytes) -> Result<(), PeerError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), PeerError>;
}

/// Receiving half of a peer connection
#[async_trait]
pub trait PeerSource: Send {
    /// Next frame from the peer
    async fn recv(&mut self) -> Result<PeerFrame, PeerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_close_codes() {
        assert!(PeerError::Closed(CLOSE_NORMAL).is_clean_close());
        assert!(PeerError::Closed(CLOSE_GOING_AWAY).is_clean_close());
        assert!(!PeerError::Closed(CLOSE_NO_STATUS).is_clean_close());
        assert!(!PeerError::Closed(CLOSE_ABNORMAL).is_clean_close());
        assert!(!PeerError::Transport("reset".into()).is_clean_close());
    }
}
