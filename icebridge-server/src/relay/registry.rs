// Ownership and lifecycle of all peer relays, keyed by remote player id.
//
// The registry is owned by the adapter loop; relays never escape it. The
// observable relay state (ICE state, data-channel flag) is updated here from
// relay events so `status` can report it without asking the engine.

use crate::relay::relay::{Relay, RelayConfig, RelaySpawner};
use crate::relay::RelayEvent;
use anyhow::Result;
use icebridge_core::{IceServerConfig, PlayerId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

struct RelayEntry {
    remote_login: String,
    create_offer: bool,
    ice_state: String,
    data_channel_open: bool,
    relay: Box<dyn Relay>,
}

pub struct RelayRegistry {
    relays: HashMap<PlayerId, RelayEntry>,
    spawner: Arc<dyn RelaySpawner>,
    events: mpsc::Sender<RelayEvent>,
    game_udp_port: u16,
}

impl RelayRegistry {
    pub fn new(
        spawner: Arc<dyn RelaySpawner>,
        events: mpsc::Sender<RelayEvent>,
        game_udp_port: u16,
    ) -> Self {
        Self {
            relays: HashMap::new(),
            spawner,
            events,
            game_udp_port,
        }
    }

    /// Create a relay for a remote player. An existing relay for the same id
    /// is closed and replaced; the previous peer connection is gone after
    /// this returns. Returns the relay's local UDP port.
    pub async fn create(
        &mut self,
        remote_id: PlayerId,
        remote_login: &str,
        create_offer: bool,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<u16> {
        if let Some(mut previous) = self.relays.remove(&remote_id) {
            warn!("replacing existing relay for peer {remote_id}");
            previous.relay.close().await;
        }

        let config = RelayConfig {
            remote_id,
            remote_login: remote_login.to_owned(),
            create_offer,
            game_udp_port: self.game_udp_port,
            ice_servers,
        };
        let relay = self.spawner.spawn(config, self.events.clone()).await?;
        let port = relay.local_udp_port();
        self.relays.insert(
            remote_id,
            RelayEntry {
                remote_login: remote_login.to_owned(),
                create_offer,
                ice_state: "new".to_owned(),
                data_channel_open: false,
                relay,
            },
        );
        Ok(port)
    }

    /// Drop a relay; closing releases its UDP socket and peer connection.
    /// Unknown ids are a no-op, so teardown is idempotent.
    pub async fn remove(&mut self, remote_id: PlayerId) -> bool {
        match self.relays.remove(&remote_id) {
            Some(mut entry) => {
                entry.relay.close().await;
                info!("removed relay for peer {remote_id}");
                true
            }
            None => false,
        }
    }

    /// Route an inbound ICE signaling payload into a relay. An unknown id is
    /// logged, not raised.
    pub async fn ice_msg(&mut self, remote_id: PlayerId, msg: Value) {
        let Some(entry) = self.relays.get_mut(&remote_id) else {
            warn!("no relay for remote peer {remote_id} found");
            return;
        };
        if let Err(e) = entry.relay.add_ice_message(msg).await {
            warn!("ICE message for peer {remote_id} rejected: {e}");
        }
    }

    /// Drop every relay. Used on game disconnect.
    pub async fn clear(&mut self) {
        for (_, mut entry) in self.relays.drain() {
            entry.relay.close().await;
        }
    }

    pub fn contains(&self, remote_id: PlayerId) -> bool {
        self.relays.contains_key(&remote_id)
    }

    pub fn local_port(&self, remote_id: PlayerId) -> Option<u16> {
        self.relays
            .get(&remote_id)
            .map(|entry| entry.relay.local_udp_port())
    }

    pub fn set_ice_state(&mut self, remote_id: PlayerId, state: &str) -> bool {
        match self.relays.get_mut(&remote_id) {
            Some(entry) => {
                entry.ice_state = state.to_owned();
                true
            }
            None => false,
        }
    }

    pub fn set_data_channel_open(&mut self, remote_id: PlayerId) -> bool {
        match self.relays.get_mut(&remote_id) {
            Some(entry) => {
                entry.data_channel_open = true;
                true
            }
            None => false,
        }
    }

    /// Per-relay status objects for the `status` RPC method.
    pub fn status(&self) -> Value {
        let mut relays: Vec<(&PlayerId, &RelayEntry)> = self.relays.iter().collect();
        relays.sort_by_key(|(id, _)| **id);
        Value::Array(
            relays
                .into_iter()
                .map(|(id, entry)| {
                    json!({
                        "remote_player_id": id.0,
                        "remote_player_login": entry.remote_login,
                        "local_game_udp_port": entry.relay.local_udp_port(),
                        "ice_agent": {
                            "state": entry.ice_state,
                            "datachannel_open": entry.data_channel_open,
                            "offerer": entry.create_offer,
                        },
                    })
                })
                .collect(),
        )
    }
}
