//! KubeVirt serial console over the `console` subresource websocket

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use super::{ConsoleProvider, ConsoleStream};
use crate::error::{ProviderError, StreamError};
use crate::pipe::{PipeReader, PipeWriter};
use crate::termination::BUFFER_SIZE;
use crate::types::ConsoleTarget;

/// Websocket subprotocol of the KubeVirt console subresource
pub const PLAIN_SUBPROTOCOL: &str = "plain.kubevirt.io";

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How long a local close waits for the server's close frame
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens VMI serial consoles through the Kubernetes API server
#[derive(Debug, Clone)]
pub struct KubevirtProvider {
    server: String,
    token: Option<String>,
    insecure_skip_tls_verify: bool,
    retry_interval: Duration,
}

impl KubevirtProvider {
    /// Create a provider for the API server at `server`
    /// (`https://`, `http://`, `wss://` or `ws://`)
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into().trim_end_matches('/').to_string(),
            token: None,
            insecure_skip_tls_verify: false,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Authenticate with a bearer token
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Accept any server certificate
    pub fn insecure_skip_tls_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_tls_verify = insecure;
        self
    }

    /// Delay between handshake attempts while the console is unavailable
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Websocket URL of the console subresource for `target`
    pub fn console_url(&self, target: &ConsoleTarget) -> Result<String, ProviderError> {
        let base = if let Some(rest) = self.server.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.server.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else if self.server.starts_with("wss://") || self.server.starts_with("ws://") {
            self.server.clone()
        } else {
            return Err(ProviderError::InvalidEndpoint(format!(
                "unsupported scheme in server URL '{}'",
                self.server
            )));
        };

        Ok(format!(
            "{}/apis/subresources.kubevirt.io/v1/namespaces/{}/virtualmachineinstances/{}/console",
            base, target.namespace, target.name
        ))
    }

    fn request(&self, target: &ConsoleTarget) -> Result<Request, ProviderError> {
        let mut request = self
            .console_url(target)?
            .into_client_request()
            .map_err(|e| ProviderError::InvalidEndpoint(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(PLAIN_SUBPROTOCOL),
        );
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ProviderError::InvalidEndpoint(format!("invalid token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(request)
    }

    fn connector(&self) -> Result<Option<Connector>, ProviderError> {
        if !self.insecure_skip_tls_verify {
            return Ok(None);
        }
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Some(Connector::NativeTls(tls)))
    }
}

#[async_trait]
impl ConsoleProvider for KubevirtProvider {
    async fn open(
        &self,
        target: &ConsoleTarget,
        timeout: Duration,
    ) -> Result<Box<dyn ConsoleStream>, ProviderError> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let request = self.request(target)?;
            let connector = self.connector()?;
            let remaining = deadline.saturating_duration_since(Instant::now());

            let handshake = tokio::time::timeout(
                remaining,
                connect_async_tls_with_config(request, None, false, connector),
            )
            .await;

            let reason = match handshake {
                Ok(Ok((socket, _response))) => {
                    tracing::debug!(vmi = %target, attempt, "serial console websocket connected");
                    return Ok(Box::new(KubevirtStream { socket }));
                }
                Ok(Err(e)) => retryable(e, target)?,
                Err(_) => return Err(ProviderError::Timeout(timeout)),
            };

            if Instant::now() + self.retry_interval >= deadline {
                return Err(ProviderError::Timeout(timeout));
            }
            tracing::debug!(vmi = %target, attempt, %reason, "serial console not available yet, retrying");
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}

/// Returns the failure description if the handshake may succeed later
fn retryable(err: WsError, target: &ConsoleTarget) -> Result<String, ProviderError> {
    match err {
        WsError::Http(response) => match response.status() {
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(target.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ProviderError::Forbidden(target.to_string()))
            }
            status => Ok(format!("HTTP {}", status)),
        },
        WsError::Url(e) => Err(ProviderError::InvalidEndpoint(e.to_string())),
        WsError::Tls(e) => Err(ProviderError::Transport(e.to_string())),
        other => Ok(other.to_string()),
    }
}

struct KubevirtStream {
    socket: Socket,
}

#[async_trait]
impl ConsoleStream for KubevirtStream {
    async fn relay(
        self: Box<Self>,
        input: PipeReader,
        output: PipeWriter,
    ) -> Result<(), StreamError> {
        let (sink, mut stream) = self.socket.split();

        tokio::select! {
            result = pump_to_console(input, sink) => result?,
            result = pump_from_console(&mut stream, output) => return result,
        }

        // Closed locally: let the server answer the close handshake
        let acknowledged = tokio::time::timeout(CLOSE_ACK_TIMEOUT, async {
            while let Some(Ok(message)) = stream.next().await {
                if message.is_close() {
                    return true;
                }
            }
            false
        })
        .await;
        if !matches!(acknowledged, Ok(true)) {
            tracing::debug!("console closed without a close acknowledgement");
        }
        Ok(())
    }
}

/// Returns once local input is exhausted and the close frame is sent
async fn pump_to_console(
    input: PipeReader,
    mut sink: SplitSink<Socket, Message>,
) -> Result<(), StreamError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = input.read(&mut buf).await;
        if n == 0 {
            if let Err(e) = sink.send(Message::Close(None)).await {
                tracing::debug!("Failed to send close frame: {}", e);
            }
            return Ok(());
        }
        sink.send(Message::Binary(buf[..n].to_vec()))
            .await
            .map_err(stream_error)?;
    }
}

async fn pump_from_console(
    stream: &mut SplitStream<Socket>,
    output: PipeWriter,
) -> Result<(), StreamError> {
    while let Some(message) = stream.next().await {
        let data = match message.map_err(stream_error)? {
            Message::Binary(data) => data,
            Message::Text(text) => text.into_bytes(),
            Message::Close(frame) => return close_result(frame),
            _ => continue,
        };
        if output.write(&data).await.is_err() {
            // Local side is gone
            return Ok(());
        }
    }
    Err(StreamError::AbnormalClosure)
}

fn close_result(frame: Option<CloseFrame<'_>>) -> Result<(), StreamError> {
    match frame {
        None => Ok(()),
        Some(frame) => match frame.code {
            CloseCode::Normal | CloseCode::Away => Ok(()),
            code => Err(StreamError::Closed {
                code: code.into(),
                reason: frame.reason.into_owned(),
            }),
        },
    }
}

fn stream_error(err: WsError) -> StreamError {
    use tokio_tungstenite::tungstenite::error::ProtocolError;

    match err {
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            StreamError::AbnormalClosure
        }
        WsError::Io(e)
            if matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::BrokenPipe
            ) =>
        {
            StreamError::AbnormalClosure
        }
        WsError::Io(e) => StreamError::Io(e),
        other => StreamError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn target() -> ConsoleTarget {
        ConsoleTarget::new("demo", "vm-01")
    }

    #[test]
    fn test_console_url_from_https() {
        let provider = KubevirtProvider::new("https://10.0.0.1:6443/");
        assert_eq!(
            provider.console_url(&target()).unwrap(),
            "wss://10.0.0.1:6443/apis/subresources.kubevirt.io/v1/namespaces/demo/virtualmachineinstances/vm-01/console"
        );
    }

    #[test]
    fn test_console_url_from_http() {
        let provider = KubevirtProvider::new("http://localhost:8001");
        assert!(provider
            .console_url(&target())
            .unwrap()
            .starts_with("ws://localhost:8001/apis/"));
    }

    #[test]
    fn test_console_url_rejects_unknown_scheme() {
        let provider = KubevirtProvider::new("ftp://cluster");
        assert!(matches!(
            provider.console_url(&target()),
            Err(ProviderError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_request_headers() {
        let provider =
            KubevirtProvider::new("https://cluster").with_token(Some("abc".to_string()));
        let request = provider.request(&target()).unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer abc"
        );
        assert_eq!(
            request.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            PLAIN_SUBPROTOCOL
        );
    }

    #[test]
    fn test_close_result_codes() {
        assert!(close_result(None).is_ok());
        assert!(close_result(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed(""),
        }))
        .is_ok());
        assert!(close_result(Some(CloseFrame {
            code: CloseCode::Away,
            reason: Cow::Borrowed("bye"),
        }))
        .is_ok());

        let err = close_result(Some(CloseFrame {
            code: CloseCode::Error,
            reason: Cow::Borrowed("vm stopped"),
        }))
        .unwrap_err();
        assert!(matches!(err, StreamError::Closed { code: 1011, ref reason } if reason == "vm stopped"));
    }

    #[test]
    fn test_reset_is_abnormal_closure() {
        use tokio_tungstenite::tungstenite::error::ProtocolError;

        assert!(matches!(
            stream_error(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
            StreamError::AbnormalClosure
        ));
        assert!(matches!(
            stream_error(WsError::Io(std::io::Error::from(ErrorKind::ConnectionReset))),
            StreamError::AbnormalClosure
        ));
        assert!(matches!(
            stream_error(WsError::Io(std::io::Error::from(ErrorKind::PermissionDenied))),
            StreamError::Io(_)
        ));
    }
}
