//! In-process HTTP/1.1 server serving canned responses for tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// What the server does when a path is requested.
pub enum Route {
    Reply(CannedResponse),
    /// Accept the request and never answer.
    Stall,
}

pub struct CannedResponse {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            reason: "OK",
            headers: vec![("Content-Type".to_string(), "text/html".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn with_content_type(body: &str, content_type: &str) -> Self {
        Self {
            status: 200,
            reason: "OK",
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self {
            status,
            reason: "Moved",
            headers: vec![("Location".to_string(), location.to_string())],
            body: Vec::new(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            reason: "Not Found",
            headers: Vec::new(),
            body: b"gone".to_vec(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

struct ServerState {
    routes: HashMap<String, Route>,
    /// (path, raw request head) per handled request, in arrival order.
    requests: Mutex<Vec<(String, String)>>,
}

pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start(routes: HashMap<String, Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(ServerState {
            routes,
            requests: Mutex::new(Vec::new()),
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let conn_state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = handle_connection(socket, conn_state).await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.addr.port(), path)
    }

    pub async fn hits(&self, path: &str) -> usize {
        self.state
            .requests
            .lock()
            .await
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    pub async fn requests(&self) -> Vec<(String, String)> {
        self.state.requests.lock().await.clone()
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    state: Arc<ServerState>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 64 * 1024 {
            return Ok(());
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    // Drain any request body announced by Content-Length.
    if let Some(len) = content_length(&head) {
        let mut remaining = len.saturating_sub(buf.len() - head_end);
        while remaining > 0 {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            remaining = remaining.saturating_sub(n);
        }
    }

    state.requests.lock().await.push((path.clone(), head));

    let fallback = Route::Reply(CannedResponse::not_found());
    let route = state.routes.get(&path).unwrap_or(&fallback);

    match route {
        Route::Stall => {
            // Hold the socket open until the peer goes away.
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            Ok(())
        }
        Route::Reply(canned) => {
            let mut response = format!("HTTP/1.1 {} {}\r\n", canned.status, canned.reason);
            for (name, value) in &canned.headers {
                response.push_str(&format!("{}: {}\r\n", name, value));
            }
            response.push_str(&format!("Content-Length: {}\r\n", canned.body.len()));
            response.push_str("Connection: close\r\n\r\n");

            socket.write_all(response.as_bytes()).await?;
            socket.write_all(&canned.body).await?;
            socket.flush().await?;
            Ok(())
        }
    }
}

fn content_length(head: &str) -> Option<usize> {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
}
