//! Transport abstraction
//!
//! A [`Transport`] opens [`Link`]s; a link carries whole text messages in
//! both directions. [`WebSocketTransport`] is the default, one JSON payload
//! per text message. [`LineTransport`] frames each payload as one
//! newline-terminated line over plain TCP.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use super::SessionError;
use crate::config::ObserverProtocol;

/// Longest accepted line; a machine state payload is well under 2 KiB
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Factory for live connections
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new link to `address`
    async fn connect(&self, address: &str) -> Result<Box<dyn Link>, SessionError>;
}

/// One live, bidirectional message connection
#[async_trait]
pub trait Link: Send {
    /// Next inbound message, or `None` once the peer has closed
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Send one message
    async fn send(&mut self, text: String) -> Result<(), SessionError>;

    /// Close the link; errors while closing are ignored
    async fn close(&mut self);
}

/// Transport speaking `protocol`
pub fn transport_for(protocol: ObserverProtocol) -> Arc<dyn Transport> {
    match protocol {
        ObserverProtocol::WebSocket => Arc::new(WebSocketTransport),
        ObserverProtocol::Lines => Arc::new(LineTransport),
    }
}

/// WebSocket client transport
///
/// Addresses may be full `ws://` URLs or bare `host:port`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, address: &str) -> Result<Box<dyn Link>, SessionError> {
        let link = WebSocketLink::connect(address).await?;
        Ok(Box::new(link))
    }
}

/// `ws://` URL for an address given as `host:port` or as a URL
pub fn websocket_url(address: &str) -> String {
    if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_string()
    } else {
        format!("ws://{}", address)
    }
}

/// A WebSocket carrying one JSON payload per text message
pub struct WebSocketLink<S> {
    socket: WebSocketStream<S>,
}

impl<S> WebSocketLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a socket that has completed its handshake
    pub fn new(socket: WebSocketStream<S>) -> Self {
        Self { socket }
    }
}

impl WebSocketLink<MaybeTlsStream<TcpStream>> {
    /// Open a client connection
    pub async fn connect(address: &str) -> Result<Self, SessionError> {
        let url = websocket_url(address);
        let (socket, _response) =
            tokio_tungstenite::connect_async_with_config(url.as_str(), None, true).await?;
        Ok(Self::new(socket))
    }
}

impl WebSocketLink<TcpStream> {
    /// Run the server handshake on an accepted stream
    pub async fn accept(stream: TcpStream) -> Result<Self, SessionError> {
        let socket = tokio_tungstenite::accept_async(stream).await?;
        Ok(Self::new(socket))
    }
}

#[async_trait]
impl<S> Link for WebSocketLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        while let Some(message) = self.socket.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("Ignoring non-UTF-8 binary message"),
                },
                Ok(Message::Close(_)) => return None,
                // Pings are answered by the protocol layer
                Ok(_) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}

/// TCP transport with newline-delimited JSON framing
#[derive(Debug, Clone, Copy, Default)]
pub struct LineTransport;

#[async_trait]
impl Transport for LineTransport {
    async fn connect(&self, address: &str) -> Result<Box<dyn Link>, SessionError> {
        let link = LineLink::connect(address).await?;
        Ok(Box::new(link))
    }
}

/// A line-framed TCP stream
pub struct LineLink {
    framed: Framed<TcpStream, LinesCodec>,
}

impl LineLink {
    /// Wrap an already connected stream
    pub fn new(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        }
    }

    /// Open a client connection with Nagle disabled
    pub async fn connect<A: ToSocketAddrs>(address: A) -> Result<Self, SessionError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Link for LineLink {
    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.framed
            .next()
            .await
            .map(|line| line.map_err(SessionError::from))
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.framed.send(text).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = SinkExt::<String>::close(&mut self.framed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_line_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut link = LineLink::new(stream);
            let line = link.recv().await.unwrap().unwrap();
            link.send(format!("echo:{}", line)).await.unwrap();
        });

        let mut client = LineTransport.connect(&addr.to_string()).await.unwrap();
        client.send(r#"{"type":"control"}"#.to_string()).await.unwrap();
        let reply = client.recv().await.unwrap().unwrap();
        assert_eq!(reply, r#"echo:{"type":"control"}"#);

        server.await.unwrap();
        // Server dropped its end
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut link = WebSocketLink::accept(stream).await.unwrap();
            let text = link.recv().await.unwrap().unwrap();
            link.send(format!("echo:{}", text)).await.unwrap();
            link.close().await;
        });

        let mut client = WebSocketTransport.connect(&addr.to_string()).await.unwrap();
        client.send(r#"{"type":"control"}"#.to_string()).await.unwrap();
        let reply = client.recv().await.unwrap().unwrap();
        assert_eq!(reply, r#"echo:{"type":"control"}"#);

        // Close frame from the server ends the stream
        assert!(client.recv().await.is_none());
        server.await.unwrap();
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("127.0.0.1:8765"), "ws://127.0.0.1:8765");
        assert_eq!(websocket_url("ws://fcu.local:8765/"), "ws://fcu.local:8765/");
        assert_eq!(websocket_url("wss://fcu.local"), "wss://fcu.local");
    }

    #[tokio::test]
    async fn test_websocket_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = transport_for(ObserverProtocol::WebSocket)
            .connect(&addr.to_string())
            .await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = LineTransport.connect(&addr.to_string()).await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }
}
