use icebridge_core::PlayerId;

/// Runtime configuration of the adapter, as parsed from the command line.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Port of the loopback JSON-RPC control server. 0 picks a free port.
    pub rpc_port: u16,
    /// Port of the loopback game-control server. 0 picks a free port.
    pub gpgnet_port: u16,
    /// Local UDP port the game listens on for peer traffic.
    pub lobby_port: u16,
    /// Identity of the local player.
    pub player_id: PlayerId,
    pub player_login: String,
    /// Path of the log file, if logging to a file was requested.
    pub log_file: Option<String>,
}

impl AdapterOptions {
    pub fn new(player_id: i32, player_login: impl Into<String>) -> Self {
        Self {
            rpc_port: 0,
            gpgnet_port: 0,
            lobby_port: 0,
            player_id: PlayerId(player_id),
            player_login: player_login.into(),
            log_file: None,
        }
    }
}
