#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::Mutex,
    time::sleep,
};

/// Canned response for one path of the stub server.
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub delay_ms: u64,
}

impl StubResponse {
    pub fn ok(body: &str) -> Self {
        StubResponse {
            status: 200,
            headers: vec![],
            body: body.into(),
            delay_ms: 0,
        }
    }

    pub fn redirect(location: &str) -> Self {
        StubResponse {
            status: 301,
            headers: vec![("Location".into(), location.into())],
            body: String::new(),
            delay_ms: 0,
        }
    }

    pub fn status(status: u16) -> Self {
        StubResponse {
            status,
            headers: vec![],
            body: String::new(),
            delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Minimal http/1.1 stub listening on a random loopback port. One response
/// per path, shared by HEAD and GET; unknown paths get a 404. Counts every
/// request and records the raw request text for assertions.
pub struct StubServer {
    pub port: u16,
    pub hits: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<String>>>,
    routes: Arc<Mutex<HashMap<String, StubResponse>>>,
}

impl StubServer {
    pub async fn start() -> StubServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let hits = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let routes: Arc<Mutex<HashMap<String, StubResponse>>> = Arc::new(Mutex::new(HashMap::new()));

        let server = StubServer {
            port,
            hits: hits.clone(),
            max_in_flight: max_in_flight.clone(),
            requests: requests.clone(),
            routes: routes.clone(),
        };

        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(_) => break,
                };
                let hits = hits.clone();
                let in_flight = in_flight.clone();
                let max_in_flight = max_in_flight.clone();
                let requests = requests.clone();
                let routes = routes.clone();
                tokio::spawn(async move {
                    handle(
                        socket,
                        hits,
                        in_flight,
                        max_in_flight,
                        requests,
                        routes,
                    )
                    .await;
                });
            }
        });

        server
    }

    pub async fn route(&self, path: &str, response: StubResponse) {
        self.routes.lock().await.insert(path.to_string(), response);
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

async fn handle(
    mut socket: tokio::net::TcpStream,
    hits: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
    routes: Arc<Mutex<HashMap<String, StubResponse>>>,
) {
    let mut buf: Vec<u8> = vec![];
    let mut tmp = [0u8; 1024];

    // read the head, then as much body as content-length promises
    loop {
        let n = match socket.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
        if let Some(head_end) = find_head_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }

    let request = String::from_utf8_lossy(&buf).to_string();
    let mut parts = request.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    hits.fetch_add(1, Ordering::SeqCst);
    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    max_in_flight.fetch_max(now, Ordering::SeqCst);
    requests.lock().await.push(request);

    let response = routes
        .lock()
        .await
        .get(&path)
        .cloned()
        .unwrap_or_else(|| StubResponse::status(404));

    if response.delay_ms > 0 {
        sleep(Duration::from_millis(response.delay_ms)).await;
    }

    let reason = match response.status {
        200 => "OK",
        301 => "Moved Permanently",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason);
    for (name, value) in &response.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));

    let _ = socket.write_all(head.as_bytes()).await;
    if method != "HEAD" {
        let _ = socket.write_all(response.body.as_bytes()).await;
    }
    let _ = socket.flush().await;

    in_flight.fetch_sub(1, Ordering::SeqCst);
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
