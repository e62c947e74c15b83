use icebridge_core::{Chunk, PlayerId};
use serde_json::json;

use crate::integration::{init_tracing, start_adapter};
use crate::utils::{GpgNetClient, RpcTestClient};

#[tokio::test]
async fn join_game_creates_a_relay_and_points_the_game_at_it() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut rpc = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");
    let mut game = GpgNetClient::connect(adapter.gpgnet_port)
        .await
        .expect("game connect failed");
    game.send_game_state("Lobby").await.expect("send failed");

    let response = rpc
        .call("joinGame", json!(["ada", 2]), 1)
        .await
        .expect("no response");
    assert_eq!(response["result"], "ok");

    let spawned = adapter.spawner.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].remote_id, PlayerId(2));
    assert_eq!(spawned[0].remote_login, "ada");
    assert!(!spawned[0].create_offer);

    // The mock spawner hands out ports from 40000; the first relay's port
    // is what the game is pointed at.
    let msg = game.recv().await.expect("no JoinGame");
    assert_eq!(msg.header, "JoinGame");
    assert_eq!(
        msg.chunks,
        vec![
            Chunk::from("127.0.0.1:40000"),
            Chunk::from("ada"),
            Chunk::Int(2),
        ]
    );

    let status = rpc.call("status", json!([]), 2).await.expect("no response");
    let relays = status["result"]["relays"].as_array().unwrap();
    assert_eq!(relays.len(), 1);
    assert_eq!(relays[0]["remote_player_id"], 2);
    assert_eq!(relays[0]["remote_player_login"], "ada");
    assert_eq!(relays[0]["local_game_udp_port"], 40000);
}

#[tokio::test]
async fn disconnect_from_peer_is_idempotent() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut rpc = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");
    let mut game = GpgNetClient::connect(adapter.gpgnet_port)
        .await
        .expect("game connect failed");
    game.send_game_state("Lobby").await.expect("send failed");

    rpc.call("connectToPeer", json!(["bob", 7, true]), 1)
        .await
        .expect("no response");
    let msg = game.recv().await.expect("no ConnectToPeer");
    assert_eq!(msg.header, "ConnectToPeer");

    let response = rpc
        .call("disconnectFromPeer", json!([7]), 2)
        .await
        .expect("no response");
    assert_eq!(response["result"], "ok");
    let msg = game.recv().await.expect("no DisconnectFromPeer");
    assert_eq!(msg.header, "DisconnectFromPeer");
    assert_eq!(msg.chunks, vec![Chunk::Int(7)]);

    // Unknown peer: still "ok", but nothing is destroyed or sent again.
    let response = rpc
        .call("disconnectFromPeer", json!([7]), 3)
        .await
        .expect("no response");
    assert_eq!(response["result"], "ok");
    game.expect_silence().await;
    assert_eq!(adapter.spawner.closed(), vec![PlayerId(7)]);
}

#[tokio::test]
async fn rejoining_the_same_peer_replaces_the_relay() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut rpc = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");
    let mut game = GpgNetClient::connect(adapter.gpgnet_port)
        .await
        .expect("game connect failed");
    game.send_game_state("Lobby").await.expect("send failed");

    rpc.call("joinGame", json!(["ada", 2]), 1)
        .await
        .expect("no response");
    game.recv().await.expect("no JoinGame");

    rpc.call("joinGame", json!(["ada", 2]), 2)
        .await
        .expect("no response");
    game.recv().await.expect("no second JoinGame");

    // The first relay was closed when the second took its place.
    assert_eq!(adapter.spawner.spawned().len(), 2);
    assert_eq!(adapter.spawner.closed(), vec![PlayerId(2)]);

    let status = rpc.call("status", json!([]), 3).await.expect("no response");
    assert_eq!(status["result"]["relays"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn disconnect_purges_queued_tasks_for_that_peer() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut rpc = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");

    // No game yet: both tasks stay queued.
    rpc.call("connectToPeer", json!(["bob", 9, true]), 1)
        .await
        .expect("no response");
    rpc.call("disconnectFromPeer", json!([9]), 2)
        .await
        .expect("no response");

    let mut game = GpgNetClient::connect(adapter.gpgnet_port)
        .await
        .expect("game connect failed");
    game.send_game_state("Lobby").await.expect("send failed");

    // The stale ConnectToPeer was purged; only the disconnect goes out.
    let msg = game.recv().await.expect("no DisconnectFromPeer");
    assert_eq!(msg.header, "DisconnectFromPeer");
    assert_eq!(msg.chunks, vec![Chunk::Int(9)]);
    game.expect_silence().await;
}
