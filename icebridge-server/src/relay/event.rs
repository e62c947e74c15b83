use icebridge_core::PlayerId;
use serde_json::Value;

/// Events a relay marshals back into the adapter loop. Relay callbacks run
/// on engine threads and never touch adapter state directly.
#[derive(Debug)]
pub enum RelayEvent {
    /// An ICE signaling payload (offer, answer, or candidate) to forward to
    /// the remote peer via the control client.
    IceMessage { remote_id: PlayerId, msg: Value },
    /// The ICE connection state changed.
    IceState { remote_id: PlayerId, state: String },
    /// The data channel to the peer is open for game traffic.
    DataChannelOpen { remote_id: PlayerId },
}
