//! [`CockpitServer`] – HTTP + WebSocket server for the operator dashboard.
//!
//! Listens on `0.0.0.0:8080` (configurable via [`CockpitServer::with_port`]).
//!
//! | Request | Response |
//! |---|---|
//! | `GET /` | embedded dashboard page |
//! | `GET /status` | latest status snapshot as JSON (key required) |
//! | `GET /schema` | JSON schema of the operator command set |
//! | WebSocket upgrade | bidirectional bridge to the control loop (key required) |

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use krishi_link::Topic;
use krishi_runtime::CommandHandle;
use krishi_types::{KrishiError, MissionEvent, OperatorCommand, StatusSnapshot};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Default TCP port for the cockpit HTTP/WebSocket server.
pub const DEFAULT_PORT: u16 = 8080;

/// The compiled-in dashboard page.
const COCKPIT_HTML: &str = include_str!("cockpit.html");

/// Pending command acknowledgements per client.
const ACK_QUEUE: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// CockpitServer
// ─────────────────────────────────────────────────────────────────────────────

pub struct CockpitServer {
    handle: CommandHandle,
    port: u16,
    password: Option<Zeroizing<String>>,
}

impl CockpitServer {
    /// Create a server bridging `handle` on the [`DEFAULT_PORT`], open to
    /// every client.
    pub fn new(handle: CommandHandle) -> Self {
        Self {
            handle,
            port: DEFAULT_PORT,
            password: None,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Require `?key=<password>` on status and WebSocket requests.  An empty
    /// password leaves the server open.
    pub fn with_password(mut self, password: Option<Zeroizing<String>>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn requires_key(&self) -> bool {
        self.password.is_some()
    }

    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`KrishiError::Io`] if the port cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, KrishiError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        TcpListener::bind(addr)
            .await
            .map_err(|e| KrishiError::Io(format!("cockpit bind error on {addr}: {e}")))
    }

    /// Bind and serve forever.
    pub async fn run(self) -> Result<(), KrishiError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), KrishiError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, keyed = self.requires_key(), "cockpit listening");
        }
        let access = Arc::new(Access {
            handle: self.handle,
            password: self.password,
        });

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let access = Arc::clone(&access);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, access).await {
                            warn!(%peer, error = %e, "cockpit client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "cockpit accept error"),
            }
        }
    }
}

struct Access {
    handle: CommandHandle,
    password: Option<Zeroizing<String>>,
}

impl Access {
    fn authorized(&self, key: Option<&str>) -> bool {
        match &self.password {
            None => true,
            Some(password) => key.is_some_and(|k| k == password.as_str()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
struct RequestHead {
    method: String,
    path: String,
    key: Option<String>,
    upgrade: bool,
}

fn parse_head(preview: &str) -> Option<RequestHead> {
    let mut lines = preview.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?;
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let key = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("key="))
        .map(percent_decode);
    let upgrade = lines.any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });
    Some(RequestHead {
        method,
        path: path.to_string(),
        key,
        upgrade,
    })
}

/// Decode `%XX` escapes and `+` in a query value.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-connection handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, access: Arc<Access>) -> Result<(), KrishiError> {
    // `peek` leaves the request in the socket so tungstenite's handshaker
    // still sees all of it.
    let mut buf = [0u8; 2048];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| KrishiError::Io(format!("peek error from {peer}: {e}")))?;
    let preview = String::from_utf8_lossy(&buf[..n]).into_owned();
    let head = parse_head(&preview);

    if let Some(head) = &head
        && head.upgrade
        && access.authorized(head.key.as_deref())
    {
        return handle_ws(stream, peer, access).await;
    }

    // Plain HTTP: consume the request head before answering.
    if !consume_request(&mut stream, &mut buf, peer).await {
        return Ok(());
    }
    let Some(head) = head else {
        return respond(&mut stream, "400 Bad Request", "text/plain", "malformed request").await;
    };
    if head.upgrade {
        warn!(%peer, "websocket upgrade without a valid key");
        return respond(&mut stream, "401 Unauthorized", "text/plain", "missing or wrong key").await;
    }

    debug!(%peer, method = %head.method, path = %head.path, "cockpit request");
    match (head.method.as_str(), head.path.as_str()) {
        ("GET", "/") | ("GET", "/index.html") => {
            respond(&mut stream, "200 OK", "text/html; charset=utf-8", COCKPIT_HTML).await
        }
        ("GET", "/status") if !access.authorized(head.key.as_deref()) => {
            respond(&mut stream, "401 Unauthorized", "text/plain", "missing or wrong key").await
        }
        ("GET", "/status") => {
            let status = access.handle.status();
            json_response(&mut stream, &*status).await
        }
        ("GET", "/schema") => {
            let schema = schemars::schema_for!(OperatorCommand);
            json_response(&mut stream, &schema).await
        }
        _ => respond(&mut stream, "404 Not Found", "text/plain", "not found").await,
    }
}

/// Drain the peeked request.  `false` means the peer is gone and there is
/// nobody left to answer.
async fn consume_request<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8], peer: SocketAddr) -> bool {
    match stream.read(buf).await {
        Ok(0) => {
            debug!(%peer, "peer closed before the request was read");
            false
        }
        Ok(_) => true,
        Err(e) => {
            debug!(%peer, error = %e, "failed to read request");
            false
        }
    }
}

async fn json_response<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<(), KrishiError> {
    match serde_json::to_string(value) {
        Ok(body) => respond(stream, "200 OK", "application/json", &body).await,
        Err(e) => {
            warn!(error = %e, "failed to serialise response");
            respond(stream, "500 Internal Server Error", "text/plain", "serialisation failed").await
        }
    }
}

async fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) -> Result<(), KrishiError> {
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| KrishiError::Io(format!("HTTP write error: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Messages pushed to the browser, tagged by `"type"`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound {
    Status {
        status: Arc<StatusSnapshot>,
    },
    Event {
        topic: &'static str,
        event: MissionEvent,
    },
    Ack {
        command: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

fn topic_name(topic: Topic) -> &'static str {
    match topic {
        Topic::Mission => "mission",
        Topic::Diagnosis => "diagnosis",
        Topic::Alerts => "alerts",
    }
}

async fn handle_ws(stream: TcpStream, peer: SocketAddr, access: Arc<Access>) -> Result<(), KrishiError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| KrishiError::Io(format!("WS handshake from {peer}: {e}")))?;
    info!(%peer, "cockpit client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let handle = access.handle.clone();
    let mut status = handle.subscribe_status();
    let mut mission = handle.bus().subscribe_to(Topic::Mission);
    let mut diagnosis = handle.bus().subscribe_to(Topic::Diagnosis);
    let mut alerts = handle.bus().subscribe_to(Topic::Alerts);
    let (ack_tx, mut ack_rx) = mpsc::channel(ACK_QUEUE);

    let initial = {
        let snapshot = status.borrow_and_update().clone();
        Outbound::Status { status: snapshot }
    };
    if !forward(&mut ws_tx, &initial).await {
        return Ok(());
    }

    loop {
        let outbound = tokio::select! {
            changed = status.changed() => match changed {
                Ok(()) => {
                    let snapshot = status.borrow_and_update().clone();
                    Outbound::Status { status: snapshot }
                }
                Err(_) => break,
            },
            Some(event) = mission.recv() => Outbound::Event { topic: topic_name(mission.topic()), event },
            Some(event) = diagnosis.recv() => Outbound::Event { topic: topic_name(diagnosis.topic()), event },
            Some(event) = alerts.recv() => Outbound::Event { topic: topic_name(alerts.topic()), event },
            Some(ack) = ack_rx.recv() => ack,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_command(text.as_str()) {
                    Ok(command) => {
                        dispatch(handle.clone(), command, ack_tx.clone());
                        continue;
                    }
                    Err(rejection) => rejection,
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };
        if !forward(&mut ws_tx, &outbound).await {
            break;
        }
    }

    info!(%peer, "cockpit client disconnected");
    Ok(())
}

fn parse_command(text: &str) -> Result<OperatorCommand, Outbound> {
    serde_json::from_str(text).map_err(|e| Outbound::Ack {
        command: "unknown".to_string(),
        ok: false,
        error: Some(format!("unrecognised command: {e}")),
    })
}

/// Run `command` on its own task so a long mission step never stalls the
/// stream of status updates to this client.
fn dispatch(handle: CommandHandle, command: OperatorCommand, acks: mpsc::Sender<Outbound>) {
    tokio::spawn(async move {
        let name = command.name();
        debug!(command = name, "cockpit command");
        let result = handle.execute(command).await;
        let ack = Outbound::Ack {
            command: name.to_string(),
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        };
        let _ = acks.send(ack).await;
    });
}

/// Serialise and send `outbound`.  Returns `false` once the client is gone.
async fn forward<S>(sink: &mut S, outbound: &Outbound) -> bool
where
    S: Sink<Message> + Unpin,
{
    match serde_json::to_string(outbound) {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to serialise cockpit message");
            true
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
