use serde_json::json;

use crate::integration::{init_tracing, start_adapter};
use crate::utils::RpcTestClient;

#[tokio::test]
async fn two_objects_in_one_write_are_processed_in_order() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut client = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");

    client
        .send_raw(
            br#"{"jsonrpc":"2.0","method":"status","params":[],"id":1}{"jsonrpc":"2.0","method":"status","params":[],"id":2}"#,
        )
        .await
        .expect("send failed");

    let first = client.read_frame().await.expect("no first response");
    let second = client.read_frame().await.expect("no second response");
    assert_eq!(first["id"], 1);
    assert_eq!(second["id"], 2);
}

#[tokio::test]
async fn garbage_clears_the_buffer_and_the_connection_recovers() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut client = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");

    client.send_raw(b"this is not json").await.expect("send failed");

    // The buffer was discarded but the connection stays up; a fresh request
    // on the same socket is served normally.
    let response = client.call("status", json!([]), 9).await.expect("no response");
    assert_eq!(response["id"], 9);
    assert!(response.get("result").is_some());
}

#[tokio::test]
async fn whitespace_and_chunked_writes_reassemble() {
    init_tracing();
    let adapter = start_adapter().await;

    let mut client = RpcTestClient::connect(adapter.rpc_port)
        .await
        .expect("connect failed");

    client.send_raw(b"  \r\n").await.expect("send failed");
    client
        .send_raw(br#"{"jsonrpc":"2.0","method":"sta"#)
        .await
        .expect("send failed");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    client
        .send_raw(br#"tus","params":[],"id":3}"#)
        .await
        .expect("send failed");

    let response = client.read_frame().await.expect("no response");
    assert_eq!(response["id"], 3);
}
