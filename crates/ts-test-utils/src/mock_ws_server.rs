// mock_ws_server: a scriptable mock upstream WebSocket server for exercising
// ts-connector against both raw WebSocket and Socket.IO v4 transports without
// a real third-party endpoint.
//
// Binds to port 0 (random) and exposes the actual bound port. Each test
// spins up its own isolated server instance.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

/// One scripted frame (or pause) the mock server sends, in order, after a
/// client connects (and, in Socket.IO mode, after the handshake completes).
#[derive(Debug, Clone)]
pub enum ScriptedFrame {
    Text(String),
    Binary(Vec<u8>),
    Wait(Duration),
}

impl ScriptedFrame {
    pub fn json(value: &serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }

    /// A Socket.IO v4 EVENT packet: `42["<name>",<args...>]`.
    pub fn socketio_event(name: &str, args: &[serde_json::Value]) -> Self {
        let mut array = vec![serde_json::Value::String(name.to_owned())];
        array.extend_from_slice(args);
        Self::Text(format!("42{}", serde_json::Value::Array(array)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Raw,
    SocketIo,
}

/// A mock upstream server for integration testing `ts-connector`.
pub struct MockUpstreamServer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockUpstreamServer {
    /// Starts a raw-WebSocket mock: `script` is streamed verbatim to every
    /// connecting client.
    pub async fn start(script: Vec<ScriptedFrame>) -> Self {
        Self::spawn(script, Transport::Raw).await
    }

    /// Starts a Socket.IO v4 mock: performs the Engine.IO `open` / Socket.IO
    /// `CONNECT` handshake with each client before streaming `script`.
    pub async fn start_socketio(script: Vec<ScriptedFrame>) -> Self {
        Self::spawn(script, Transport::SocketIo).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn spawn(script: Vec<ScriptedFrame>, transport: Transport) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");

        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                let script = script.clone();
                tokio::spawn(async move {
                    let _ = Self::handle_connection(stream, script, transport).await;
                });
            }
        });

        Self { addr, _task: task }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        script: Vec<ScriptedFrame>,
        transport: Transport,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        if transport == Transport::SocketIo {
            write.send(Message::Text(r#"0{"sid":"mock-sid"}"#.to_owned())).await?;
            loop {
                let Some(Ok(Message::Text(text))) = read.next().await else {
                    return Ok(());
                };
                if text.starts_with('2') {
                    write.send(Message::Text("3".to_owned())).await?;
                    continue;
                }
                if text.starts_with("40") {
                    write.send(Message::Text(r#"40{"sid":"mock-sid"}"#.to_owned())).await?;
                    break;
                }
            }
        }

        for frame in script {
            match frame {
                ScriptedFrame::Text(text) => write.send(Message::Text(text)).await?,
                ScriptedFrame::Binary(bytes) => write.send(Message::Binary(bytes)).await?,
                ScriptedFrame::Wait(d) => tokio::time::sleep(d).await,
            }
        }

        // Keep the connection open (pings, graceful close) until the client
        // drops it, rather than closing the instant the script is exhausted.
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Ping(payload)) => write.send(Message::Pong(payload)).await?,
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}
