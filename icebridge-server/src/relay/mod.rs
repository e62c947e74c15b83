mod event;
mod peer_relay;
mod registry;
mod relay;

pub use event::RelayEvent;
pub use peer_relay::{PeerRelay, WebRtcSpawner};
pub use registry::RelayRegistry;
pub use relay::{Relay, RelayConfig, RelaySpawner};
