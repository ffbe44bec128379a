//! Minimal in-process payment provider for tests: accepts real HTTP
//! connections, records every request, and answers POSTs (open charge) and
//! GETs (charge status) with canned responses the test can swap at any time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Clone)]
struct CannedResponse {
    status: u16,
    body: String,
}

pub struct MockGateway {
    pub base_url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    open_response: Arc<Mutex<CannedResponse>>,
    status_response: Arc<Mutex<CannedResponse>>,
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

impl MockGateway {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::default();
        let open_response = Arc::new(Mutex::new(CannedResponse {
            status: 200,
            body: r#"{"payment_session_id":"session-test"}"#.to_string(),
        }));
        let status_response = Arc::new(Mutex::new(CannedResponse {
            status: 200,
            body: r#"{"order_status":"ACTIVE"}"#.to_string(),
        }));

        let reqs = requests.clone();
        let open = open_response.clone();
        let status = status_response.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };

                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                let (head, body_start) = loop {
                    let Ok(n) = stream.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        break (String::new(), 0);
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break (String::from_utf8_lossy(&buf[..pos]).to_string(), pos + 4);
                    }
                };
                if head.is_empty() {
                    continue;
                }

                let mut lines = head.lines();
                let request_line = lines.next().unwrap_or_default();
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                let mut headers = HashMap::new();
                for line in lines {
                    if let Some((k, v)) = line.split_once(':') {
                        headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
                    }
                }

                let content_length: usize = headers
                    .get("content-length")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                while buf.len() - body_start < content_length {
                    let Ok(n) = stream.read(&mut chunk).await else {
                        break;
                    };
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let body = String::from_utf8_lossy(&buf[body_start..]).to_string();

                let canned = if method == "POST" {
                    open.lock().expect("mock lock").clone()
                } else {
                    status.lock().expect("mock lock").clone()
                };

                reqs.lock().expect("mock lock").push(CapturedRequest {
                    method,
                    path,
                    headers,
                    body,
                });

                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    canned.status,
                    status_text(canned.status),
                    canned.body.len(),
                    canned.body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.flush().await;
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            open_response,
            status_response,
        }
    }

    pub fn set_open_response(&self, status: u16, body: &str) {
        *self.open_response.lock().expect("mock lock") = CannedResponse {
            status,
            body: body.to_string(),
        };
    }

    pub fn set_status_response(&self, status: u16, body: &str) {
        *self.status_response.lock().expect("mock lock") = CannedResponse {
            status,
            body: body.to_string(),
        };
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().expect("mock lock").clone()
    }
}
