// mock_http_server: a minimal scripted HTTP server for exercising
// `http-polling` feeds without a real upstream. Each accepted connection is
// answered with the next response in a round-robin script, regardless of
// path or method.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct MockHttpServer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockHttpServer {
    /// `bodies` are served round-robin, one per request, as
    /// `200 OK application/json` responses.
    pub async fn start(bodies: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock http server");
        let addr = listener.local_addr().expect("local addr");
        let bodies = Arc::new(bodies);
        let next = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _peer)) = listener.accept().await else {
                    break;
                };
                let bodies = bodies.clone();
                let next = next.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    // Drain (and discard) the request; we don't need to parse it.
                    let _ = stream.read(&mut buf).await;

                    let body = if bodies.is_empty() {
                        "{}".to_owned()
                    } else {
                        let idx = next.fetch_add(1, Ordering::Relaxed) % bodies.len();
                        bodies[idx].clone()
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { addr, _task: task }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}
