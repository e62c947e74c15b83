// End-to-end check of the webrtc-backed relay: two relays on the same host
// exchange their ICE signaling directly (playing the part of two adapters
// wired through a lobby server) and game traffic crosses the data channel.

use icebridge_core::PlayerId;
use icebridge_server::relay::{PeerRelay, Relay, RelayConfig, RelayEvent};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::integration::init_tracing;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

fn config(remote_id: i32, create_offer: bool, game_udp_port: u16) -> RelayConfig {
    RelayConfig {
        remote_id: PlayerId(remote_id),
        remote_login: format!("peer-{remote_id}"),
        create_offer,
        game_udp_port,
        ice_servers: vec![], // host candidates are enough on loopback
    }
}

/// Shuttle ICE messages between the two relays until both data channels
/// report open.
async fn run_signaling(
    relay_a: &mut PeerRelay,
    relay_b: &mut PeerRelay,
    events_a: &mut mpsc::Receiver<RelayEvent>,
    events_b: &mut mpsc::Receiver<RelayEvent>,
) {
    let mut open_a = false;
    let mut open_b = false;
    while !(open_a && open_b) {
        tokio::select! {
            Some(event) = events_a.recv() => match event {
                RelayEvent::IceMessage { msg, .. } => {
                    relay_b.add_ice_message(msg).await.expect("B rejected signal");
                }
                RelayEvent::DataChannelOpen { .. } => open_a = true,
                RelayEvent::IceState { state, .. } => {
                    tracing::debug!("relay A ICE state: {state}");
                }
            },
            Some(event) = events_b.recv() => match event {
                RelayEvent::IceMessage { msg, .. } => {
                    relay_a.add_ice_message(msg).await.expect("A rejected signal");
                }
                RelayEvent::DataChannelOpen { .. } => open_b = true,
                RelayEvent::IceState { state, .. } => {
                    tracing::debug!("relay B ICE state: {state}");
                }
            },
        }
    }
}

#[tokio::test]
async fn game_traffic_crosses_the_data_channel() {
    init_tracing();

    // The socket standing in for the remote side's game.
    let game_b = UdpSocket::bind(("127.0.0.1", 0)).await.expect("bind failed");
    let game_b_port = game_b.local_addr().unwrap().port();

    let (tx_a, mut events_a) = mpsc::channel(256);
    let (tx_b, mut events_b) = mpsc::channel(256);

    let mut relay_a = PeerRelay::new(config(2, true, 0), tx_a)
        .await
        .expect("relay A failed");
    let mut relay_b = PeerRelay::new(config(1, false, game_b_port), tx_b)
        .await
        .expect("relay B failed");

    tokio::time::timeout(
        CONNECT_TIMEOUT,
        run_signaling(&mut relay_a, &mut relay_b, &mut events_a, &mut events_b),
    )
    .await
    .expect("data channels did not open in time");

    // Local game sends to relay A's port; the payload must surface at the
    // remote game's socket, delivered by relay B.
    let game_a = UdpSocket::bind(("127.0.0.1", 0)).await.expect("bind failed");
    let payload = b"move 4711";

    let mut buf = [0u8; 1500];
    let received = tokio::time::timeout(Duration::from_secs(10), async {
        // Datagrams sent before the channel settles may be dropped; retry.
        loop {
            game_a
                .send_to(payload, ("127.0.0.1", relay_a.local_udp_port()))
                .await
                .expect("send failed");
            match tokio::time::timeout(Duration::from_millis(500), game_b.recv_from(&mut buf)).await
            {
                Ok(Ok((n, _))) => return n,
                _ => continue,
            }
        }
    })
    .await
    .expect("no datagram crossed the channel");

    assert_eq!(&buf[..received], payload);

    relay_a.close().await;
    relay_b.close().await;
}

#[tokio::test]
async fn relay_ports_are_stable_and_distinct() {
    init_tracing();

    let (tx_a, _events_a) = mpsc::channel(256);
    let (tx_b, _events_b) = mpsc::channel(256);

    let mut relay_a = PeerRelay::new(config(2, true, 0), tx_a)
        .await
        .expect("relay A failed");
    let mut relay_b = PeerRelay::new(config(3, true, 0), tx_b)
        .await
        .expect("relay B failed");

    let port_a = relay_a.local_udp_port();
    let port_b = relay_b.local_udp_port();
    assert_ne!(port_a, 0);
    assert_ne!(port_a, port_b);
    // Stable across calls for the relay's lifetime.
    assert_eq!(relay_a.local_udp_port(), port_a);

    relay_a.close().await;
    relay_b.close().await;
}
