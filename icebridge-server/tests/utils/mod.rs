
pub use gpgnet_client::GpgNetClient;
pub use mock_relay::MockRelaySpawner;
pub use rpc_client::RpcTestClient;
