// JSON-RPC 2.0 over persistent loopback TCP.
//
// The listener and each connection's reader/writer run as small transport
// tasks; everything stateful (client registry, pending-request table, id
// counter) lives in `RpcServer`, which is owned and driven by the adapter's
// event loop. Transport tasks never touch state directly, they only push
// `RpcTransportEvent`s into the loop's channel.

use crate::rpc::framer::JsonFramer;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

pub type ClientId = u64;

/// Continuation invoked with `(result, error)` when the matching response
/// arrives, the target client disconnects, or the deadline expires.
pub type ResponseHandler = Box<dyn FnOnce(Option<Value>, Option<Value>) + Send>;

/// Raw transport events marshalled into the adapter loop.
pub enum RpcTransportEvent {
    Connected(ClientId, mpsc::UnboundedSender<Vec<u8>>),
    Disconnected(ClientId),
    Frame(ClientId, Value),
    /// A per-request deadline fired. Ignored if the request already resolved.
    Deadline(i64),
}

/// What the protocol layer surfaces to the adapter after classification.
/// Responses are consumed internally by the pending-request table.
pub enum RpcInbound {
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    Request {
        client: ClientId,
        /// Echoed verbatim in the response; absent for notifications.
        id: Option<Value>,
        method: String,
        params: Vec<Value>,
    },
}

struct PendingRequest {
    client: ClientId,
    respond: ResponseHandler,
}

pub struct RpcServer {
    clients: HashMap<ClientId, mpsc::UnboundedSender<Vec<u8>>>,
    pending: HashMap<i64, PendingRequest>,
    next_id: i64,
    local_port: u16,
    event_tx: mpsc::Sender<RpcTransportEvent>,
}

impl RpcServer {
    /// Bind `127.0.0.1:port` and start the accept loop. Port 0 picks a free
    /// port; the bound port is available via [`local_port`](Self::local_port).
    pub async fn bind(port: u16) -> Result<(Self, mpsc::Receiver<RpcTransportEvent>)> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("unable to bind RPC port {port}"))?;
        let local_port = listener.local_addr()?.port();
        let (event_tx, event_rx) = mpsc::channel(256);

        tokio::spawn(accept_loop(listener, event_tx.clone()));

        let server = Self {
            clients: HashMap::new(),
            pending: HashMap::new(),
            next_id: 1,
            local_port,
            event_tx,
        };
        Ok((server, event_rx))
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Advance protocol state with one transport event. Requests come back
    /// out for dispatch; responses resolve pending continuations in place.
    pub fn handle_event(&mut self, event: RpcTransportEvent) -> Option<RpcInbound> {
        match event {
            RpcTransportEvent::Connected(client, tx) => {
                debug!("RPC client {client} connected");
                self.clients.insert(client, tx);
                Some(RpcInbound::ClientConnected(client))
            }
            RpcTransportEvent::Disconnected(client) => {
                self.clients.remove(&client)?;
                debug!("RPC client {client} disconnected");
                self.fail_pending_for(client);
                Some(RpcInbound::ClientDisconnected(client))
            }
            RpcTransportEvent::Frame(client, frame) => {
                if !self.clients.contains_key(&client) {
                    return None;
                }
                self.classify(client, frame)
            }
            RpcTransportEvent::Deadline(request_id) => {
                if let Some(pending) = self.pending.remove(&request_id) {
                    warn!("RPC request {request_id} timed out");
                    (pending.respond)(None, Some(Value::from("request timed out")));
                }
                None
            }
        }
    }

    fn classify(&mut self, client: ClientId, frame: Value) -> Option<RpcInbound> {
        if let Some(method) = frame.get("method") {
            let id = frame.get("id").cloned();
            let Some(method) = method.as_str() else {
                if let Some(id) = id {
                    self.respond(
                        client,
                        id,
                        None,
                        Some(json!({
                            "code": -1,
                            "message": "'method' parameter must be a string",
                        })),
                    );
                }
                return None;
            };
            let params = frame
                .get("params")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            trace!("dispatching RPC method '{method}'");
            return Some(RpcInbound::Request {
                client,
                id,
                method: method.to_owned(),
                params,
            });
        }

        if frame.get("result").is_some() || frame.get("error").is_some() {
            // Response frame. Non-integer or unknown ids are dropped.
            let Some(id) = frame.get("id").and_then(Value::as_i64) else {
                return None;
            };
            if let Some(pending) = self.pending.remove(&id) {
                let result = frame.get("result").filter(|v| !v.is_null()).cloned();
                let error = frame.get("error").filter(|v| !v.is_null()).cloned();
                (pending.respond)(result, error);
            }
            return None;
        }

        trace!("dropping frame that is neither request nor response");
        None
    }

    /// Send the response to a request that carried an `id`. Emits `result`
    /// when present, otherwise `error`; a missing error is reported as an
    /// internal error rather than `error: null`.
    pub fn respond(
        &mut self,
        client: ClientId,
        id: Value,
        result: Option<Value>,
        error: Option<Value>,
    ) {
        let mut response = json!({ "jsonrpc": "2.0", "id": id });
        match result {
            Some(result) => {
                response["result"] = result;
            }
            None => {
                response["error"] = error.unwrap_or_else(|| {
                    json!({ "code": -32603, "message": "internal error" })
                });
            }
        }
        self.write_frame(client, &response);
    }

    /// Broadcast a notification (no `id`, no pending entry) to every
    /// connected control client.
    pub fn notify(&mut self, method: &str, params: Vec<Value>) {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let payload = encode_frame(&frame);
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, tx)| tx.send(payload.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        for client in dead {
            warn!("dropping RPC client {client}: send failed");
            self.clients.remove(&client);
            self.fail_pending_for(client);
        }
    }

    /// Send a request expecting a correlated response to one client.
    /// Requests are always targeted; only notifications broadcast.
    pub fn send_request(
        &mut self,
        method: &str,
        params: Vec<Value>,
        client: ClientId,
        deadline: Option<Duration>,
        respond: ResponseHandler,
    ) {
        if method.is_empty() {
            respond(None, Some(Value::from("method MUST not be empty")));
            return;
        }
        if !self.clients.contains_key(&client) {
            respond(None, Some(Value::from("send failed")));
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        if !self.write_frame(client, &frame) {
            respond(None, Some(Value::from("send failed")));
            return;
        }
        self.pending.insert(id, PendingRequest { client, respond });

        if let Some(deadline) = deadline {
            let event_tx = self.event_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                let _ = event_tx.send(RpcTransportEvent::Deadline(id)).await;
            });
        }
    }

    /// Fail every pending request targeted at a client that is gone.
    fn fail_pending_for(&mut self, client: ClientId) {
        let stale: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.client == client)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(pending) = self.pending.remove(&id) {
                (pending.respond)(None, Some(Value::from("client disconnected")));
            }
        }
    }

    fn write_frame(&mut self, client: ClientId, frame: &Value) -> bool {
        let Some(tx) = self.clients.get(&client) else {
            return false;
        };
        trace!("sending {frame}");
        if tx.send(encode_frame(frame)).is_err() {
            warn!("dropping RPC client {client}: send failed");
            self.clients.remove(&client);
            self.fail_pending_for(client);
            return false;
        }
        true
    }
}

fn encode_frame(frame: &Value) -> Vec<u8> {
    let mut bytes = frame.to_string().into_bytes();
    bytes.push(b'\n');
    bytes
}

async fn accept_loop(listener: TcpListener, event_tx: mpsc::Sender<RpcTransportEvent>) {
    let mut next_client: ClientId = 1;
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("RPC accept failed: {e}");
                continue;
            }
        };
        let client = next_client;
        next_client += 1;
        debug!("RPC client connected from {addr}");

        let (read_half, write_half) = socket.into_split();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        if event_tx
            .send(RpcTransportEvent::Connected(client, write_tx))
            .await
            .is_err()
        {
            return;
        }
        tokio::spawn(write_loop(write_half, write_rx));
        tokio::spawn(read_loop(read_half, client, event_tx.clone()));
    }
}

async fn write_loop(mut socket: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(payload) = rx.recv().await {
        if socket.write_all(&payload).await.is_err() {
            break;
        }
    }
}

async fn read_loop(
    mut socket: OwnedReadHalf,
    client: ClientId,
    event_tx: mpsc::Sender<RpcTransportEvent>,
) {
    let mut framer = JsonFramer::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        framer.push(&buf[..n]);
        loop {
            match framer.next_object() {
                Ok(Some(frame)) => {
                    if event_tx
                        .send(RpcTransportEvent::Frame(client, frame))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(None) => break,
                // Buffer already cleared; the connection stays up.
                Err(e) => warn!("RPC client {client}: {e}"),
            }
        }
    }
    let _ = event_tx.send(RpcTransportEvent::Disconnected(client)).await;
}
