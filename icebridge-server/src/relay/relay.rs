use crate::relay::RelayEvent;
use anyhow::Result;
use async_trait::async_trait;
use icebridge_core::{IceServerConfig, PlayerId};
use serde_json::Value;
use tokio::sync::mpsc;

/// Everything needed to stand up one peer relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub remote_id: PlayerId,
    pub remote_login: String,
    /// Whether this side initiates the SDP offer.
    pub create_offer: bool,
    /// UDP port the local game listens on; peer traffic is delivered there.
    pub game_udp_port: u16,
    pub ice_servers: Vec<IceServerConfig>,
}

/// One established relay, owning its peer connection and local UDP socket.
/// The port is stable for the relay's whole lifetime.
#[async_trait]
pub trait Relay: Send {
    fn local_udp_port(&self) -> u16;

    /// Route an inbound ICE signaling payload into the connection.
    async fn add_ice_message(&mut self, msg: Value) -> Result<()>;

    /// Release the peer connection and the UDP socket.
    async fn close(&mut self);
}

/// Seam to the ICE engine, so tests can substitute a mock for the
/// webrtc-backed implementation.
#[async_trait]
pub trait RelaySpawner: Send + Sync {
    /// Create a relay and start ICE gathering. Events flow into `events`.
    async fn spawn(
        &self,
        config: RelayConfig,
        events: mpsc::Sender<RelayEvent>,
    ) -> Result<Box<dyn Relay>>;
}
