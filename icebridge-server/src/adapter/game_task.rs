use icebridge_core::PlayerId;

/// Lobby-state-dependent commands deferred until the game can accept them.
/// Held in a FIFO queue with head-of-line blocking: a gated task at the
/// front keeps everything behind it waiting.
#[derive(Debug, Clone, PartialEq)]
pub enum GameTask {
    HostGame {
        map: String,
    },
    JoinGame {
        remote_login: String,
        remote_id: PlayerId,
    },
    ConnectToPeer {
        remote_login: String,
        remote_id: PlayerId,
    },
    DisconnectFromPeer {
        remote_id: PlayerId,
    },
}

impl GameTask {
    /// The peer a queued connect-type task waits on, if any. Used to purge
    /// stale tasks when that peer's relay is torn down.
    pub fn waits_on_relay(&self) -> Option<PlayerId> {
        match self {
            GameTask::JoinGame { remote_id, .. } | GameTask::ConnectToPeer { remote_id, .. } => {
                Some(*remote_id)
            }
            GameTask::HostGame { .. } | GameTask::DisconnectFromPeer { .. } => None,
        }
    }
}
