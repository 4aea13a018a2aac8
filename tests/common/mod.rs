//! Scripted loopback HTTP server for integration tests.
//!
//! The server answers requests with a fixed queue of canned responses,
//! shared across connections, and records every raw request it reads.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

pub struct TestServer {
    port: u16,
    requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl TestServer {
    /// Start a server that pops one response from `responses` per request.
    /// When the queue runs dry the connection is held open silently.
    pub async fn start(responses: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_requests = Arc::clone(&requests);
        let accept_connections = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_connections.fetch_add(1, Ordering::SeqCst);
                let queue = Arc::clone(&queue);
                let requests = Arc::clone(&accept_requests);
                tokio::spawn(serve_connection(stream, queue, requests));
            }
        });

        Self { port, requests, connections }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Raw requests received so far, in arrival order.
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    /// Number of TCP connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_connection(
    stream: TcpStream,
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
) {
    let mut reader = BufReader::new(stream);
    loop {
        let request = match read_request(&mut reader).await {
            Some(request) => request,
            None => return,
        };
        requests.lock().await.push(request);

        let response = queue.lock().await.pop_front();
        match response {
            Some(response) => {
                let close = response.windows(17).any(|w| w == b"Connection: close");
                if reader.get_mut().write_all(&response).await.is_err() {
                    return;
                }
                if close {
                    return;
                }
            }
            None => {
                // Out of script: hold the connection open without answering.
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                return;
            }
        }
    }
}

/// Read one request (head plus any Content-Length or chunked body) and
/// render it as text for assertions.
async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.ok()?;
        if n == 0 {
            return None;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        head.push_str(trimmed);
        head.push('\n');
    }

    let mut body = Vec::new();
    if let Some(length) = header_value(&head, "Content-Length") {
        let length: usize = length.parse().ok()?;
        body.resize(length, 0);
        reader.read_exact(&mut body).await.ok()?;
    } else if header_value(&head, "Transfer-Encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).await.ok()?;
            let size = usize::from_str_radix(size_line.trim(), 16).ok()?;
            let mut chunk = vec![0u8; size + 2];
            reader.read_exact(&mut chunk).await.ok()?;
            chunk.truncate(size);
            body.extend_from_slice(&chunk);
            if size == 0 {
                break;
            }
        }
    }

    head.push_str(&String::from_utf8_lossy(&body));
    Some(head)
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim()
            .eq_ignore_ascii_case(name)
            .then(|| v.trim().to_string())
    })
}

/// Build a response with `Content-Length` filled in.
pub fn response(status_line: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(status_line.as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        && !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("Transfer-Encoding"))
    {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Shorthand for a 200 text response.
pub fn ok_response(body: &str) -> Vec<u8> {
    response("HTTP/1.1 200 OK", &[("Content-Type", "text/plain")], body.as_bytes())
}
