// The adapter controller.
//
// One cooperative loop braids the three event streams: control-client RPC
// frames, game-control messages, and per-relay ICE signals. All adapter
// state lives here and is touched only from this loop; the transport tasks
// and engine callbacks reach it exclusively through channels.

use crate::adapter::game_task::GameTask;
use crate::gpgnet::{GpgNetEvent, GpgNetServer};
use crate::options::AdapterOptions;
use crate::relay::{RelayEvent, RelayRegistry, RelaySpawner};
use crate::rpc::{RpcInbound, RpcServer, RpcTransportEvent};
use anyhow::{Context, Result};
use icebridge_core::{Chunk, GpgNetMessage, IceServerConfig, PlayerId};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const LOBBY_STATE: &str = "Lobby";
const NAT_TRAVERSAL_PROVIDER: i32 = 1;

/// The result of one RPC method dispatch: at most one of the two is set.
type MethodOutcome = (Option<Value>, Option<Value>);

pub struct IceAdapter {
    options: AdapterOptions,
    rpc: RpcServer,
    rpc_rx: mpsc::Receiver<RpcTransportEvent>,
    gpgnet: GpgNetServer,
    gpgnet_rx: mpsc::Receiver<GpgNetEvent>,
    relays: RelayRegistry,
    relay_rx: mpsc::Receiver<RelayEvent>,
    game_tasks: VecDeque<GameTask>,
    game_state: String,
    task_string: String,
    lobby_init_mode: String,
    ice_servers: Vec<IceServerConfig>,
    running: bool,
}

impl IceAdapter {
    /// Bind both loopback servers and assemble the controller. A failed bind
    /// is fatal for the daemon.
    pub async fn bind(options: AdapterOptions, spawner: Arc<dyn RelaySpawner>) -> Result<Self> {
        let (rpc, rpc_rx) = RpcServer::bind(options.rpc_port)
            .await
            .context("starting RPC server")?;
        let (gpgnet, gpgnet_rx) = GpgNetServer::bind(options.gpgnet_port)
            .await
            .context("starting game-control server")?;
        let (relay_tx, relay_rx) = mpsc::channel(256);
        let relays = RelayRegistry::new(spawner, relay_tx, options.lobby_port);

        info!(
            "RPC server on port {}, game-control server on port {}",
            rpc.local_port(),
            gpgnet.local_port()
        );

        Ok(Self {
            options,
            rpc,
            rpc_rx,
            gpgnet,
            gpgnet_rx,
            relays,
            relay_rx,
            game_tasks: VecDeque::new(),
            game_state: "None".to_owned(),
            task_string: "Idle".to_owned(),
            lobby_init_mode: "normal".to_owned(),
            ice_servers: Vec::new(),
            running: true,
        })
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc.local_port()
    }

    pub fn gpgnet_port(&self) -> u16 {
        self.gpgnet.local_port()
    }

    /// Run until the `quit` RPC method stops the loop.
    pub async fn run(mut self) {
        info!("adapter event loop started");
        while self.running {
            tokio::select! {
                Some(event) = self.rpc_rx.recv() => self.handle_rpc_event(event).await,
                Some(event) = self.gpgnet_rx.recv() => self.handle_game_event(event).await,
                Some(event) = self.relay_rx.recv() => self.handle_relay_event(event),
                else => break,
            }
        }
        info!("adapter event loop finished");
    }

    async fn handle_rpc_event(&mut self, event: RpcTransportEvent) {
        match self.rpc.handle_event(event) {
            Some(RpcInbound::Request {
                client,
                id,
                method,
                params,
            }) => {
                let (result, error) = self.dispatch(&method, &params).await;
                if let Some(error) = &error {
                    debug!("method '{method}' failed: {error}");
                }
                if let Some(id) = id {
                    self.rpc.respond(client, id, result, error);
                }
            }
            Some(RpcInbound::ClientConnected(client)) => {
                debug!("control client {client} attached");
            }
            Some(RpcInbound::ClientDisconnected(client)) => {
                debug!("control client {client} detached");
            }
            None => {}
        }
    }

    async fn dispatch(&mut self, method: &str, params: &[Value]) -> MethodOutcome {
        match method {
            "quit" => {
                info!("quit requested");
                self.running = false;
                ok()
            }
            "hostGame" => {
                let Some(map) = params.first().and_then(Value::as_str) else {
                    return invalid("Need 1 parameter: mapName (string)");
                };
                self.host_game(map);
                ok()
            }
            "joinGame" => {
                let (Some(login), Some(id)) = (
                    params.first().and_then(Value::as_str),
                    params.get(1).and_then(Value::as_i64),
                ) else {
                    return invalid(
                        "Need 2 parameters: remotePlayerLogin (string), remotePlayerId (int)",
                    );
                };
                self.join_game(login, PlayerId(id as i32)).await
            }
            "connectToPeer" => {
                let (Some(login), Some(id), Some(offer)) = (
                    params.first().and_then(Value::as_str),
                    params.get(1).and_then(Value::as_i64),
                    params.get(2).and_then(Value::as_bool),
                ) else {
                    return invalid(
                        "Need 3 parameters: remotePlayerLogin (string), remotePlayerId (int), createOffer (bool)",
                    );
                };
                self.connect_to_peer(login, PlayerId(id as i32), offer).await
            }
            "disconnectFromPeer" => {
                let Some(id) = params.first().and_then(Value::as_i64) else {
                    return invalid("Need 1 parameters: remotePlayerId (int)");
                };
                self.disconnect_from_peer(PlayerId(id as i32)).await;
                ok()
            }
            "setLobbyInitMode" => {
                let Some(mode) = params.first().and_then(Value::as_str) else {
                    return invalid("Need 1 parameters: initMode (string)");
                };
                self.lobby_init_mode = mode.to_owned();
                ok()
            }
            "iceMsg" => {
                let (Some(id), Some(msg)) = (
                    params.first().and_then(Value::as_i64),
                    params.get(1).filter(|v| v.is_object()),
                ) else {
                    return invalid("Need 2 parameters: remotePlayerId (int), msg (object)");
                };
                self.relays.ice_msg(PlayerId(id as i32), msg.clone()).await;
                ok()
            }
            "sendToGpgNet" => {
                let (Some(header), Some(chunks)) = (
                    params.first().and_then(Value::as_str),
                    params.get(1).and_then(Value::as_array),
                ) else {
                    return invalid("Need 2 parameters: header (string), chunks (array)");
                };
                let message =
                    GpgNetMessage::new(header, chunks.iter().map(Chunk::from_json).collect());
                match self.gpgnet.send_message(&message) {
                    Ok(()) => ok(),
                    Err(e) => (None, Some(Value::from(e.to_string()))),
                }
            }
            "setIceServers" => {
                let Some(servers) = params.first().and_then(Value::as_array) else {
                    return invalid("Need 1 parameters: iceServers (array)");
                };
                // Non-object entries are skipped; the list only affects
                // relays created after this call.
                self.ice_servers = servers
                    .iter()
                    .filter_map(IceServerConfig::from_json)
                    .collect();
                ok()
            }
            "status" => (Some(self.status()), None),
            _ => (
                None,
                Some(Value::from(format!(
                    "RPC callback for method '{method}' not found"
                ))),
            ),
        }
    }

    fn host_game(&mut self, map: &str) {
        self.task_string = format!("Hosting map {map}.");
        self.queue_game_task(GameTask::HostGame {
            map: map.to_owned(),
        });
    }

    async fn join_game(&mut self, login: &str, remote_id: PlayerId) -> MethodOutcome {
        if let Err(e) = self.create_relay(remote_id, login, false).await {
            return (None, Some(Value::from(e.to_string())));
        }
        self.task_string = format!("Joining game from player {login}.");
        self.queue_game_task(GameTask::JoinGame {
            remote_login: login.to_owned(),
            remote_id,
        });
        ok()
    }

    async fn connect_to_peer(
        &mut self,
        login: &str,
        remote_id: PlayerId,
        create_offer: bool,
    ) -> MethodOutcome {
        if let Err(e) = self.create_relay(remote_id, login, create_offer).await {
            return (None, Some(Value::from(e.to_string())));
        }
        self.queue_game_task(GameTask::ConnectToPeer {
            remote_login: login.to_owned(),
            remote_id,
        });
        ok()
    }

    /// Tear down a relay and tell the game. Unknown peers are a no-op, so a
    /// second disconnect for the same peer destroys nothing twice.
    async fn disconnect_from_peer(&mut self, remote_id: PlayerId) {
        if !self.relays.remove(remote_id).await {
            debug!("no relay for remote peer {remote_id} found");
            return;
        }
        // Queued connect tasks for this peer can never run now that the
        // relay is gone; purge them so they don't wedge the queue.
        self.game_tasks
            .retain(|task| task.waits_on_relay() != Some(remote_id));
        self.queue_game_task(GameTask::DisconnectFromPeer { remote_id });
    }

    async fn create_relay(
        &mut self,
        remote_id: PlayerId,
        login: &str,
        create_offer: bool,
    ) -> Result<()> {
        self.relays
            .create(remote_id, login, create_offer, self.ice_servers.clone())
            .await
            .with_context(|| format!("creating relay for peer {remote_id}"))?;
        Ok(())
    }

    fn queue_game_task(&mut self, task: GameTask) {
        self.game_tasks.push_back(task);
        self.try_execute_game_tasks();
    }

    /// Drain the task queue as far as the game state allows. Tasks pop only
    /// after their message actually went out; a gated head stops the drain.
    fn try_execute_game_tasks(&mut self) {
        if !self.gpgnet.is_connected() {
            return;
        }
        while let Some(task) = self.game_tasks.front() {
            let sent = match task {
                GameTask::HostGame { map } => {
                    if self.game_state != LOBBY_STATE {
                        return;
                    }
                    self.gpgnet.send_host_game(map)
                }
                GameTask::JoinGame {
                    remote_login,
                    remote_id,
                }
                | GameTask::ConnectToPeer {
                    remote_login,
                    remote_id,
                } => {
                    if self.game_state != LOBBY_STATE {
                        return;
                    }
                    let Some(port) = self.relays.local_port(*remote_id) else {
                        // Relay not there yet; leave the task queued.
                        warn!("no relay found for joining player {remote_id}");
                        return;
                    };
                    let destination = format!("127.0.0.1:{port}");
                    if matches!(task, GameTask::JoinGame { .. }) {
                        self.gpgnet
                            .send_join_game(&destination, remote_login, *remote_id)
                    } else {
                        self.gpgnet
                            .send_connect_to_peer(&destination, remote_login, *remote_id)
                    }
                }
                GameTask::DisconnectFromPeer { remote_id } => {
                    self.gpgnet.send_disconnect_from_peer(*remote_id)
                }
            };
            if let Err(e) = sent {
                warn!("game task not sent: {e}");
                return;
            }
            self.game_tasks.pop_front();
        }
    }

    async fn handle_game_event(&mut self, event: GpgNetEvent) {
        match event {
            GpgNetEvent::Connected(conn, tx) => {
                self.gpgnet.set_connection(conn, tx);
                info!("game connected");
                self.rpc
                    .notify("onConnectionStateChanged", vec![Value::from("Connected")]);
            }
            GpgNetEvent::Disconnected(conn) => {
                if !self.gpgnet.connection_closed(conn) {
                    return;
                }
                info!("game disconnected");
                self.rpc
                    .notify("onConnectionStateChanged", vec![Value::from("Disconnected")]);
                self.task_string = "Idle".to_owned();
                self.game_state = "None".to_owned();
                self.relays.clear().await;
            }
            GpgNetEvent::Message(conn, message) => {
                if !self.gpgnet.is_current(conn) {
                    debug!("ignoring message from superseded game connection {conn}");
                    return;
                }
                self.handle_game_message(message);
            }
        }
    }

    fn handle_game_message(&mut self, message: GpgNetMessage) {
        info!("game message: {message}");
        if message.header == "GameState" && message.chunks.len() == 1 {
            if let Some(state) = message.chunks[0].as_str() {
                self.game_state = state.to_owned();
                if self.game_state == "Idle" {
                    let init_mode = self.lobby_init_mode_code();
                    let login = self.options.player_login.clone();
                    let outcome = self.gpgnet.send_create_lobby(
                        init_mode,
                        self.options.lobby_port,
                        &login,
                        self.options.player_id,
                        NAT_TRAVERSAL_PROVIDER,
                    );
                    if let Err(e) = outcome {
                        warn!("CreateLobby not sent: {e}");
                    }
                }
                self.try_execute_game_tasks();
            }
        }
        self.rpc.notify(
            "onGpgNetMessageReceived",
            vec![Value::from(message.header.clone()), message.chunks_to_json()],
        );
    }

    fn handle_relay_event(&mut self, event: RelayEvent) {
        let local_id = self.options.player_id;
        match event {
            RelayEvent::IceMessage { remote_id, msg } => {
                if !self.relays.contains(remote_id) {
                    return;
                }
                self.rpc.notify(
                    "onIceMsg",
                    vec![json!(local_id.0), json!(remote_id.0), msg],
                );
            }
            RelayEvent::IceState { remote_id, state } => {
                if !self.relays.set_ice_state(remote_id, &state) {
                    return;
                }
                self.rpc.notify(
                    "onIceConnectionStateChanged",
                    vec![json!(local_id.0), json!(remote_id.0), Value::from(state)],
                );
            }
            RelayEvent::DataChannelOpen { remote_id } => {
                if !self.relays.set_data_channel_open(remote_id) {
                    return;
                }
                self.rpc.notify(
                    "onDatachannelOpen",
                    vec![json!(local_id.0), json!(remote_id.0)],
                );
            }
        }
    }

    fn lobby_init_mode_code(&self) -> i32 {
        match self.lobby_init_mode.as_str() {
            "auto" => 1,
            _ => 0,
        }
    }

    fn status(&self) -> Value {
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "options": {
                "player_id": self.options.player_id.0,
                "player_login": self.options.player_login,
                "rpc_port": self.rpc.local_port(),
                "gpgnet_port": self.gpgnet.local_port(),
                "lobby_port": self.options.lobby_port,
                "log_file": self.options.log_file.clone().unwrap_or_default(),
            },
            "gpgnet": {
                "local_port": self.gpgnet.local_port(),
                "connected": self.gpgnet.is_connected(),
                "game_state": self.game_state,
                "task_string": self.task_string,
            },
            "relays": self.relays.status(),
        })
    }
}

fn ok() -> MethodOutcome {
    (Some(Value::from("ok")), None)
}

fn invalid(message: &str) -> MethodOutcome {
    (None, Some(Value::from(message)))
}
