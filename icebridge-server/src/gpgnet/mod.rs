mod codec;
mod server;

pub use codec::{decode_message, encode_message, CodecError, MAX_CHUNK_BYTES};
pub use server::{GpgNetEvent, GpgNetServer};
