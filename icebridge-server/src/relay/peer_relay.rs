// The webrtc-backed relay.
//
// Each relay owns one peer connection and one loopback UDP socket. The game
// sends its traffic for the remote player to that socket; the relay forwards
// it over the data channel, and delivers inbound channel traffic back to the
// game's own UDP port. Engine callbacks run on webrtc threads and marshal
// everything into the adapter loop through the relay's event channel.

use crate::relay::relay::{Relay, RelayConfig, RelaySpawner};
use crate::relay::RelayEvent;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use icebridge_core::PlayerId;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

type DataChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

pub struct PeerRelay {
    remote_id: PlayerId,
    peer_connection: Arc<RTCPeerConnection>,
    events: mpsc::Sender<RelayEvent>,
    local_udp_port: u16,
    udp_task: JoinHandle<()>,
}

impl PeerRelay {
    pub async fn new(config: RelayConfig, events: mpsc::Sender<RelayEvent>) -> Result<Self> {
        let remote_id = config.remote_id;

        // Bound once; the port stays stable until the relay is dropped.
        let udp = Arc::new(
            UdpSocket::bind(("127.0.0.1", 0))
                .await
                .context("binding relay UDP socket")?,
        );
        let local_udp_port = udp.local_addr()?.port();

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.all_urls(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        let candidate_tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let events = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let Ok(candidate_json) = serde_json::to_value(&init) else {
                    return;
                };
                let _ = events
                    .send(RelayEvent::IceMessage {
                        remote_id,
                        msg: json!({ "type": "candidate", "candidate": candidate_json }),
                    })
                    .await;
            })
        }));

        let state_tx = events.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                let events = state_tx.clone();
                Box::pin(async move {
                    debug!("ICE state for peer {remote_id}: {state}");
                    let _ = events
                        .send(RelayEvent::IceState {
                            remote_id,
                            state: state.to_string(),
                        })
                        .await;
                })
            },
        ));

        let channel_slot: DataChannelSlot = Arc::new(Mutex::new(None));
        let game_addr: Arc<Mutex<Option<SocketAddr>>> = Arc::new(Mutex::new(None));

        if config.create_offer {
            let dc = peer_connection.create_data_channel("game", None).await?;
            wire_data_channel(
                dc,
                remote_id,
                channel_slot.clone(),
                udp.clone(),
                game_addr.clone(),
                config.game_udp_port,
                events.clone(),
            );
        } else {
            let slot = channel_slot.clone();
            let udp_for_dc = udp.clone();
            let addr_for_dc = game_addr.clone();
            let events_for_dc = events.clone();
            let game_udp_port = config.game_udp_port;
            peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let slot = slot.clone();
                let udp = udp_for_dc.clone();
                let game_addr = addr_for_dc.clone();
                let events = events_for_dc.clone();
                Box::pin(async move {
                    debug!("data channel '{}' announced by peer {remote_id}", dc.label());
                    wire_data_channel(dc, remote_id, slot, udp, game_addr, game_udp_port, events);
                })
            }));
        }

        // Game-to-peer pump. Before the channel opens, game traffic is
        // dropped on the floor, matching a not-yet-established link.
        let pump_udp = udp.clone();
        let pump_slot = channel_slot.clone();
        let pump_addr = game_addr.clone();
        let udp_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let (n, from) = match pump_udp.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(_) => break,
                };
                *pump_addr.lock().await = Some(from);
                let channel = pump_slot.lock().await.clone();
                if let Some(dc) = channel {
                    let _ = dc.send(&Bytes::copy_from_slice(&buf[..n])).await;
                }
            }
        });

        let relay = Self {
            remote_id,
            peer_connection,
            events,
            local_udp_port,
            udp_task,
        };

        if config.create_offer {
            relay.send_offer().await?;
        }

        info!(
            "relay for peer {remote_id} ({}) up, game port {local_udp_port}, offerer: {}",
            config.remote_login, config.create_offer
        );
        Ok(relay)
    }

    /// Create and emit the local offer; ICE gathering starts here.
    async fn send_offer(&self) -> Result<()> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        let _ = self
            .events
            .send(RelayEvent::IceMessage {
                remote_id: self.remote_id,
                msg: json!({ "type": "offer", "sdp": offer.sdp }),
            })
            .await;
        Ok(())
    }

    async fn handle_remote_offer(&self, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp)?;
        self.peer_connection.set_remote_description(offer).await?;
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        let _ = self
            .events
            .send(RelayEvent::IceMessage {
                remote_id: self.remote_id,
                msg: json!({ "type": "answer", "sdp": answer.sdp }),
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl Relay for PeerRelay {
    fn local_udp_port(&self) -> u16 {
        self.local_udp_port
    }

    async fn add_ice_message(&mut self, msg: Value) -> Result<()> {
        let msg_type = msg.get("type").and_then(Value::as_str).unwrap_or_default();
        match msg_type {
            "offer" => {
                let sdp = msg
                    .get("sdp")
                    .and_then(Value::as_str)
                    .context("offer message without sdp")?;
                self.handle_remote_offer(sdp.to_owned()).await
            }
            "answer" => {
                let sdp = msg
                    .get("sdp")
                    .and_then(Value::as_str)
                    .context("answer message without sdp")?;
                let answer = RTCSessionDescription::answer(sdp.to_owned())?;
                self.peer_connection.set_remote_description(answer).await?;
                Ok(())
            }
            "candidate" => {
                let payload = msg
                    .get("candidate")
                    .cloned()
                    .context("candidate message without payload")?;
                let init: RTCIceCandidateInit =
                    serde_json::from_value(payload).context("parsing ICE candidate")?;
                self.peer_connection.add_ice_candidate(init).await?;
                Ok(())
            }
            other => bail!("unknown ICE message type '{other}'"),
        }
    }

    async fn close(&mut self) {
        self.udp_task.abort();
        if let Err(e) = self.peer_connection.close().await {
            warn!("closing relay for peer {}: {e}", self.remote_id);
        }
    }
}

fn wire_data_channel(
    dc: Arc<RTCDataChannel>,
    remote_id: PlayerId,
    slot: DataChannelSlot,
    udp: Arc<UdpSocket>,
    game_addr: Arc<Mutex<Option<SocketAddr>>>,
    game_udp_port: u16,
    events: mpsc::Sender<RelayEvent>,
) {
    let dc_for_open = dc.clone();
    let slot_for_open = slot.clone();
    let events_for_open = events.clone();
    dc.on_open(Box::new(move || {
        let dc = dc_for_open.clone();
        let slot = slot_for_open.clone();
        let events = events_for_open.clone();
        Box::pin(async move {
            info!("data channel to peer {remote_id} open");
            *slot.lock().await = Some(dc);
            let _ = events.send(RelayEvent::DataChannelOpen { remote_id }).await;
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let udp = udp.clone();
        let game_addr = game_addr.clone();
        Box::pin(async move {
            // Deliver to wherever the game last sent from, falling back to
            // its configured lobby port.
            let stored = *game_addr.lock().await;
            let dest =
                stored.unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], game_udp_port)));
            let _ = udp.send_to(&msg.data, dest).await;
        })
    }));
}

/// Production spawner: every relay is a [`PeerRelay`] on the real engine.
pub struct WebRtcSpawner;

#[async_trait]
impl RelaySpawner for WebRtcSpawner {
    async fn spawn(
        &self,
        config: RelayConfig,
        events: mpsc::Sender<RelayEvent>,
    ) -> Result<Box<dyn Relay>> {
        let relay = PeerRelay::new(config, events).await?;
        Ok(Box::new(relay))
    }
}
