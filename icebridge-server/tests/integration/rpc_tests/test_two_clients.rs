use serde_json::json;

use crate::integration::{init_tracing, start_adapter};
use crate::utils::RpcTestClient;

#[tokio::test]
async fn concurrent_clients_get_correlated_responses() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut first = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");
    let mut second = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");

    let response_a = first.call("status", json!([]), 11).await.expect("no response");
    let response_b = second.call("status", json!([]), 42).await.expect("no response");

    assert_eq!(response_a["id"], 11);
    assert_eq!(response_b["id"], 42);
    // Both clients observe the same relay list.
    assert_eq!(response_a["result"]["relays"], response_b["result"]["relays"]);
}

#[tokio::test]
async fn notifications_are_broadcast_to_every_client() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut first = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");
    let mut second = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");

    // Make sure both clients are registered before the game shows up.
    first.call("status", json!([]), 1).await.expect("no response");
    second.call("status", json!([]), 1).await.expect("no response");

    let _game = crate::utils::GpgNetClient::connect(adapter.gpgnet_port)
        .await
        .expect("game connect failed");

    for client in [&mut first, &mut second] {
        let note = client
            .wait_notification("onConnectionStateChanged")
            .await
            .expect("no notification");
        assert_eq!(note["params"], json!(["Connected"]));
        assert!(note.get("id").is_none());
    }
}
