// TCP server for the game-control channel.
//
// One game process connects here. The listener keeps accepting, but the
// latest connection is authoritative: a newer connection supersedes the
// current one, and a disconnect only counts when it is the authoritative
// connection going away. Inbound messages and connection changes are
// marshalled into the adapter loop as `GpgNetEvent`s tagged with their
// connection id so stale connections can be told apart.

use crate::gpgnet::codec::{decode_message, encode_message};
use anyhow::{bail, Context, Result};
use bytes::BytesMut;
use icebridge_core::{Chunk, GpgNetMessage, PlayerId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub enum GpgNetEvent {
    Connected(u64, mpsc::UnboundedSender<Vec<u8>>),
    Disconnected(u64),
    Message(u64, GpgNetMessage),
}

struct GameConnection {
    id: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

pub struct GpgNetServer {
    local_port: u16,
    current: Option<GameConnection>,
}

impl GpgNetServer {
    pub async fn bind(port: u16) -> Result<(Self, mpsc::Receiver<GpgNetEvent>)> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("unable to bind game-control port {port}"))?;
        let local_port = listener.local_addr()?.port();
        let (event_tx, event_rx) = mpsc::channel(256);

        tokio::spawn(accept_loop(listener, event_tx));

        let server = Self {
            local_port,
            current: None,
        };
        Ok((server, event_rx))
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.current.as_ref().is_some_and(|c| c.id == id)
    }

    /// Adopt a new game connection as authoritative. Returns true when an
    /// older connection was superseded.
    pub fn set_connection(&mut self, id: u64, tx: mpsc::UnboundedSender<Vec<u8>>) -> bool {
        let replaced = self.current.replace(GameConnection { id, tx }).is_some();
        if replaced {
            debug!("game connection {id} supersedes an earlier one");
        }
        replaced
    }

    /// Note a closed connection. Returns true only when it was the
    /// authoritative one, i.e. the game is actually gone.
    pub fn connection_closed(&mut self, id: u64) -> bool {
        if self.is_current(id) {
            self.current = None;
            true
        } else {
            false
        }
    }

    /// Write one raw message to the connected game.
    pub fn send_message(&mut self, msg: &GpgNetMessage) -> Result<()> {
        let Some(conn) = &self.current else {
            bail!("no game connected");
        };
        debug!("sending {msg} to game");
        let mut wire = BytesMut::new();
        encode_message(msg, &mut wire);
        if conn.tx.send(wire.to_vec()).is_err() {
            self.current = None;
            bail!("game connection lost");
        }
        Ok(())
    }

    pub fn send_create_lobby(
        &mut self,
        init_mode: i32,
        udp_port: u16,
        login: &str,
        player_id: PlayerId,
        nat_traversal_provider: i32,
    ) -> Result<()> {
        self.send_message(&GpgNetMessage::new(
            "CreateLobby",
            vec![
                Chunk::Int(init_mode),
                Chunk::Int(i32::from(udp_port)),
                Chunk::from(login),
                Chunk::Int(player_id.0),
                Chunk::Int(nat_traversal_provider),
            ],
        ))
    }

    pub fn send_host_game(&mut self, map: &str) -> Result<()> {
        self.send_message(&GpgNetMessage::new("HostGame", vec![Chunk::from(map)]))
    }

    pub fn send_join_game(&mut self, destination: &str, login: &str, id: PlayerId) -> Result<()> {
        self.send_message(&GpgNetMessage::new(
            "JoinGame",
            vec![Chunk::from(destination), Chunk::from(login), Chunk::Int(id.0)],
        ))
    }

    pub fn send_connect_to_peer(
        &mut self,
        destination: &str,
        login: &str,
        id: PlayerId,
    ) -> Result<()> {
        self.send_message(&GpgNetMessage::new(
            "ConnectToPeer",
            vec![Chunk::from(destination), Chunk::from(login), Chunk::Int(id.0)],
        ))
    }

    pub fn send_disconnect_from_peer(&mut self, id: PlayerId) -> Result<()> {
        self.send_message(&GpgNetMessage::new(
            "DisconnectFromPeer",
            vec![Chunk::Int(id.0)],
        ))
    }
}

async fn accept_loop(listener: TcpListener, event_tx: mpsc::Sender<GpgNetEvent>) {
    let mut next_conn: u64 = 1;
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("game-control accept failed: {e}");
                continue;
            }
        };
        let conn = next_conn;
        next_conn += 1;
        info!("game connected from {addr}");

        let (read_half, write_half) = socket.into_split();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        if event_tx
            .send(GpgNetEvent::Connected(conn, write_tx))
            .await
            .is_err()
        {
            return;
        }
        tokio::spawn(write_loop(write_half, write_rx));
        tokio::spawn(read_loop(read_half, conn, event_tx.clone()));
    }
}

async fn write_loop(mut socket: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(payload) = rx.recv().await {
        if socket.write_all(&payload).await.is_err() {
            break;
        }
    }
}

async fn read_loop(mut socket: OwnedReadHalf, conn: u64, event_tx: mpsc::Sender<GpgNetEvent>) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        loop {
            match decode_message(&mut buf) {
                Ok(Some(msg)) => {
                    if event_tx.send(GpgNetEvent::Message(conn, msg)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // A corrupt stream cannot be resynchronized; drop it.
                    warn!("game connection {conn}: {e}");
                    let _ = event_tx.send(GpgNetEvent::Disconnected(conn)).await;
                    return;
                }
            }
        }
    }
    let _ = event_tx.send(GpgNetEvent::Disconnected(conn)).await;
}
