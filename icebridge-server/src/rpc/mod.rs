mod framer;
mod server;

pub use framer::{FrameError, JsonFramer};
pub use server::{ClientId, ResponseHandler, RpcInbound, RpcServer, RpcTransportEvent};
