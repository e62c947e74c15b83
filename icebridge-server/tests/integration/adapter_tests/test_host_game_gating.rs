use icebridge_core::Chunk;
use serde_json::json;

use crate::integration::{init_tracing, start_adapter};
use crate::utils::{GpgNetClient, RpcTestClient};

#[tokio::test]
async fn host_game_waits_for_the_lobby_state() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut rpc = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");

    // No game yet: the command is accepted and queued, nothing is sent.
    let response = rpc
        .call("hostGame", json!(["SCMP_009"]), 1)
        .await
        .expect("no response");
    assert_eq!(response["result"], "ok");

    let status = rpc.call("status", json!([]), 2).await.expect("no response");
    assert_eq!(
        status["result"]["gpgnet"]["task_string"],
        "Hosting map SCMP_009."
    );

    let mut game = GpgNetClient::connect(adapter.gpgnet_port)
        .await
        .expect("game connect failed");

    // "Idle" produces CreateLobby but the hostGame task stays gated.
    game.send_game_state("Idle").await.expect("send failed");
    let msg = game.recv().await.expect("no CreateLobby");
    assert_eq!(msg.header, "CreateLobby");
    game.expect_silence().await;

    // Reaching the lobby releases the queue; HostGame goes out exactly once.
    game.send_game_state("Lobby").await.expect("send failed");
    let msg = game.recv().await.expect("no HostGame");
    assert_eq!(msg.header, "HostGame");
    assert_eq!(msg.chunks, vec![Chunk::from("SCMP_009")]);
    game.expect_silence().await;
}

#[tokio::test]
async fn tasks_are_dispatched_in_enqueue_order() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut rpc = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");

    // Queue everything before the game exists.
    rpc.call("hostGame", json!(["SCMP_016"]), 1)
        .await
        .expect("no response");
    rpc.call("connectToPeer", json!(["bob", 2, true]), 2)
        .await
        .expect("no response");
    rpc.call("connectToPeer", json!(["eve", 3, false]), 3)
        .await
        .expect("no response");

    let mut game = GpgNetClient::connect(adapter.gpgnet_port)
        .await
        .expect("game connect failed");
    game.send_game_state("Lobby").await.expect("send failed");

    let headers: Vec<String> = [
        game.recv().await.expect("no message"),
        game.recv().await.expect("no message"),
        game.recv().await.expect("no message"),
    ]
    .into_iter()
    .map(|m| m.header)
    .collect();
    assert_eq!(headers, vec!["HostGame", "ConnectToPeer", "ConnectToPeer"]);
}
