//! Socket bridge tests
//!
//! Drive the bridge with an in-memory peer and the scripted console
//! provider.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use vc_core::testing::{RemoteConsole, ScriptedProvider};
use vc_core::{
    ConsoleSession, ConsoleTarget, ProviderError, StreamError, Termination, TerminationKind,
};
use vc_web::bridge::peer::{CLOSE_GOING_AWAY, CLOSE_NORMAL};
use vc_web::bridge::STATUS_READY;
use vc_web::{run_socket, serve_console, PeerError, PeerFrame, PeerSink, PeerSource};

const BOUND: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything the bridge sent to the peer
#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Status(String),
    Payload(Bytes),
    Close,
}

/// How the sink treats console payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payloads {
    Deliver,
    Fail,
    /// Records the payload, then never completes the send
    Stall,
}

struct RecordingSink {
    sent: mpsc::UnboundedSender<Sent>,
    payloads: Payloads,
}

impl RecordingSink {
    fn new(payloads: Payloads) -> (Self, mpsc::UnboundedReceiver<Sent>) {
        let (sent, rx) = mpsc::unbounded_channel();
        (Self { sent, payloads }, rx)
    }
}

#[async_trait]
impl PeerSink for RecordingSink {
    async fn send_status(&mut self, text: &str) -> Result<(), PeerError> {
        let _ = self.sent.send(Sent::Status(text.to_string()));
        Ok(())
    }

    async fn send_payload(&mut self, data: Bytes) -> Result<(), PeerError> {
        if self.payloads == Payloads::Fail {
            return Err(PeerError::Transport("broken pipe".into()));
        }
        let _ = self.sent.send(Sent::Payload(data));
        if self.payloads == Payloads::Stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PeerError> {
        let _ = self.sent.send(Sent::Close);
        Ok(())
    }
}

/// Peer whose frames are fed by the test; silent once the feed is dropped
struct ScriptedSource {
    frames: mpsc::UnboundedReceiver<Result<PeerFrame, PeerError>>,
}

#[async_trait]
impl PeerSource for ScriptedSource {
    async fn recv(&mut self) -> Result<PeerFrame, PeerError> {
        match self.frames.recv().await {
            Some(frame) => frame,
            None => std::future::pending().await,
        }
    }
}

fn scripted_source() -> (
    ScriptedSource,
    mpsc::UnboundedSender<Result<PeerFrame, PeerError>>,
) {
    let (tx, frames) = mpsc::unbounded_channel();
    (ScriptedSource { frames }, tx)
}

fn target() -> ConsoleTarget {
    ConsoleTarget::new("demo", "vm-01")
}

struct Harness {
    sent: mpsc::UnboundedReceiver<Sent>,
    peer: mpsc::UnboundedSender<Result<PeerFrame, PeerError>>,
    remote: RemoteConsole,
    interrupt: CancellationToken,
    bridge: JoinHandle<Termination>,
}

impl Harness {
    async fn start(payloads: Payloads) -> Self {
        let (provider, mut consoles) = ScriptedProvider::connecting();
        let interrupt = CancellationToken::new();
        let session = ConsoleSession::establish(provider, target(), CONNECT_TIMEOUT, &interrupt)
            .await
            .unwrap();
        let mut remote = consoles.recv().await.unwrap();

        let (sink, sent) = RecordingSink::new(payloads);
        let (source, peer) = scripted_source();
        let token = interrupt.clone();
        let bridge = tokio::spawn(async move { run_socket(session, sink, source, &token).await });

        // The bridge prompts the console before relaying
        assert_eq!(timeout(BOUND, remote.recv_exact(1)).await.unwrap(), b"\r");

        Self {
            sent,
            peer,
            remote,
            interrupt,
            bridge,
        }
    }

    fn frame(&self, frame: PeerFrame) {
        self.peer.send(Ok(frame)).unwrap();
    }

    fn close(&self, code: u16) {
        self.peer.send(Err(PeerError::Closed(code))).unwrap();
    }

    async fn finish(self) -> (Termination, Vec<Sent>, RemoteConsole) {
        let termination = timeout(BOUND, self.bridge).await.unwrap().unwrap();
        let mut sent = self.sent;
        let mut events = Vec::new();
        while let Ok(event) = sent.try_recv() {
            events.push(event);
        }
        (termination, events, self.remote)
    }
}

fn statuses(events: &[Sent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Sent::Status(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_single_escape_byte_disconnects() {
    let harness = Harness::start(Payloads::Deliver).await;
    harness.frame(PeerFrame::Binary(Bytes::from_static(&[29])));

    let (termination, events, mut remote) = harness.finish().await;
    assert_eq!(termination.kind(), TerminationKind::EscapeSequence);
    assert_eq!(statuses(&events), vec![STATUS_READY]);
    assert_eq!(events.last(), Some(&Sent::Close));

    // The escape byte never reaches the console
    assert!(timeout(BOUND, remote.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_escape_byte_with_trailing_data_is_forwarded() {
    let mut harness = Harness::start(Payloads::Deliver).await;
    harness.frame(PeerFrame::Binary(Bytes::from_static(&[29, 0])));
    assert_eq!(
        timeout(BOUND, harness.remote.recv_exact(2)).await.unwrap(),
        vec![29, 0]
    );

    harness.close(CLOSE_NORMAL);
    let (termination, _, _) = harness.finish().await;
    assert_eq!(termination.kind(), TerminationKind::RemoteClosed);
}

#[tokio::test]
async fn test_text_is_forwarded_and_control_frames_ignored() {
    let mut harness = Harness::start(Payloads::Deliver).await;
    harness.frame(PeerFrame::Control);
    harness.frame(PeerFrame::Text("ls\r".into()));
    assert_eq!(
        timeout(BOUND, harness.remote.recv_exact(3)).await.unwrap(),
        b"ls\r"
    );

    harness.close(CLOSE_GOING_AWAY);
    let (termination, events, _) = harness.finish().await;
    assert_eq!(termination.kind(), TerminationKind::RemoteClosed);
    assert_eq!(statuses(&events), vec![STATUS_READY]);
}

#[tokio::test]
async fn test_console_output_is_sent_as_payload() {
    let mut harness = Harness::start(Payloads::Deliver).await;
    harness.remote.send(&b"login: "[..]);

    let ready = timeout(BOUND, harness.sent.recv()).await.unwrap();
    assert_eq!(ready, Some(Sent::Status(STATUS_READY.to_string())));
    let payload = timeout(BOUND, harness.sent.recv()).await.unwrap();
    assert_eq!(payload, Some(Sent::Payload(Bytes::from_static(b"login: "))));

    harness.close(CLOSE_NORMAL);
    let (termination, _, _) = harness.finish().await;
    assert!(termination.is_clean());
}

#[tokio::test]
async fn test_clean_peer_close_sends_no_error_status() {
    for code in [CLOSE_NORMAL, CLOSE_GOING_AWAY] {
        let harness = Harness::start(Payloads::Deliver).await;
        harness.close(code);

        let (termination, events, _) = harness.finish().await;
        assert_eq!(termination.kind(), TerminationKind::RemoteClosed, "code {}", code);
        assert_eq!(statuses(&events), vec![STATUS_READY], "code {}", code);
        assert_eq!(events.last(), Some(&Sent::Close));
    }
}

#[tokio::test]
async fn test_other_close_codes_are_local_errors() {
    let harness = Harness::start(Payloads::Deliver).await;
    harness.close(1011);

    let (termination, events, _) = harness.finish().await;
    assert_eq!(termination.kind(), TerminationKind::LocalIo);
    assert_eq!(
        statuses(&events),
        vec![
            STATUS_READY,
            "console connection error: websocket closed with code 1011"
        ]
    );
    assert_eq!(events.last(), Some(&Sent::Close));
}

#[tokio::test]
async fn test_abnormal_remote_closure_is_reported() {
    let harness = Harness::start(Payloads::Deliver).await;
    let Harness {
        mut sent,
        remote,
        bridge,
        ..
    } = harness;
    remote.finish(Err(StreamError::AbnormalClosure));

    let termination = timeout(BOUND, bridge).await.unwrap().unwrap();
    assert!(termination.is_abnormal_closure());

    let mut events = Vec::new();
    while let Ok(event) = sent.try_recv() {
        events.push(event);
    }
    assert_eq!(
        statuses(&events),
        vec![
            STATUS_READY,
            "serial console error: the console connection was closed abnormally"
        ]
    );
    assert_eq!(events.last(), Some(&Sent::Close));
}

#[tokio::test]
async fn test_payload_send_failure_ends_bridge() {
    let harness = Harness::start(Payloads::Fail).await;
    harness.remote.send(&b"boot"[..]);

    let (termination, events, _) = harness.finish().await;
    assert_eq!(termination.kind(), TerminationKind::LocalIo);
    let statuses = statuses(&events);
    assert_eq!(statuses.len(), 2);
    assert!(statuses[1].starts_with("console connection error: send to websocket failed"));
}

#[tokio::test]
async fn test_stalled_payload_send_does_not_block_cleanup() {
    let mut harness = Harness::start(Payloads::Stall).await;
    harness.remote.send(&b"banner"[..]);

    // The outbound task is now parked inside the send
    let ready = timeout(BOUND, harness.sent.recv()).await.unwrap();
    assert_eq!(ready, Some(Sent::Status(STATUS_READY.to_string())));
    let payload = timeout(BOUND, harness.sent.recv()).await.unwrap();
    assert_eq!(payload, Some(Sent::Payload(Bytes::from_static(b"banner"))));

    harness.frame(PeerFrame::Binary(Bytes::from_static(&[29])));
    let (termination, events, _) = harness.finish().await;
    assert_eq!(termination.kind(), TerminationKind::EscapeSequence);
    assert_eq!(events, vec![Sent::Close]);
}

#[tokio::test]
async fn test_interrupt_ends_bridge_without_status() {
    let harness = Harness::start(Payloads::Deliver).await;
    harness.interrupt.cancel();

    let (termination, events, _) = harness.finish().await;
    assert_eq!(termination.kind(), TerminationKind::UserInterrupt);
    assert_eq!(statuses(&events), vec![STATUS_READY]);
    assert_eq!(events.last(), Some(&Sent::Close));
}

#[tokio::test]
async fn test_establishment_failure_is_reported_to_peer() {
    let provider = ScriptedProvider::failing(ProviderError::NotFound("demo/vm-01".into()));
    let (sink, mut sent) = RecordingSink::new(Payloads::Deliver);
    let (source, _peer) = scripted_source();
    let shutdown = CancellationToken::new();

    let termination = timeout(
        BOUND,
        serve_console(provider, target(), CONNECT_TIMEOUT, sink, source, &shutdown),
    )
    .await
    .unwrap();
    assert_eq!(termination.kind(), TerminationKind::RemoteStream);

    assert_eq!(
        sent.recv().await,
        Some(Sent::Status(
            "serial console error: virtual machine instance not found: demo/vm-01".into()
        ))
    );
    assert_eq!(sent.recv().await, Some(Sent::Close));
}

#[tokio::test]
async fn test_shutdown_during_establishment_closes_quietly() {
    let provider = ScriptedProvider::hanging();
    let (sink, mut sent) = RecordingSink::new(Payloads::Deliver);
    let (source, _peer) = scripted_source();
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let termination = timeout(
        BOUND,
        serve_console(provider, target(), CONNECT_TIMEOUT, sink, source, &shutdown),
    )
    .await
    .unwrap();
    assert_eq!(termination.kind(), TerminationKind::UserInterrupt);
    assert_eq!(sent.recv().await, Some(Sent::Close));
}
