mod ice;
mod message;
mod player;

pub use ice::IceServerConfig;
pub use message::{Chunk, GpgNetMessage};
pub use player::PlayerId;
