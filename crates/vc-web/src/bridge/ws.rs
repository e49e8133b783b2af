//! axum websocket adapters for the peer traits

use std::borrow::Cow;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::peer::{PeerError, PeerFrame, PeerSink, PeerSource, CLOSE_ABNORMAL, CLOSE_NO_STATUS};

/// Sending half of a browser websocket
pub struct WsSink(SplitSink<WebSocket, Message>);

/// Receiving half of a browser websocket
pub struct WsSource(SplitStream<WebSocket>);

/// Split an upgraded websocket into peer halves
pub fn split(socket: WebSocket) -> (WsSink, WsSource) {
    let (sink, stream) = socket.split();
    (WsSink(sink), WsSource(stream))
}

fn transport(err: axum::Error) -> PeerError {
    PeerError::Transport(err.to_string())
}

#[async_trait]
impl PeerSink for WsSink {
    async fn send_status(&mut self, text: &str) -> Result<(), PeerError> {
        self.0
            .send(Message::Text(text.to_string()))
            .await
            .map_err(transport)
    }

    async fn send_payload(&mut self, data: Bytes) -> Result<(), PeerError> {
        self.0
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(transport)
    }

    async fn close(&mut self) -> Result<(), PeerError> {
        // The peer may already be gone
        let _ = self
            .0
            .send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: Cow::Borrowed(""),
            })))
            .await;
        self.0.close().await.map_err(transport)
    }
}

#[async_trait]
impl PeerSource for WsSource {
    async fn recv(&mut self) -> Result<PeerFrame, PeerError> {
        match self.0.next().await {
            None => Err(PeerError::Closed(CLOSE_ABNORMAL)),
            Some(Err(e)) => Err(transport(e)),
            Some(Ok(Message::Text(text))) => Ok(PeerFrame::Text(text)),
            Some(Ok(Message::Binary(data))) => Ok(PeerFrame::Binary(Bytes::from(data))),
            Some(Ok(Message::Close(frame))) => Err(PeerError::Closed(
                frame.map(|f| f.code).unwrap_or(CLOSE_NO_STATUS),
            )),
            Some(Ok(_)) => Ok(PeerFrame::Control),
        }
    }
}
