//! WebSocket endpoints and the broadcast API against a live testbed.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

mod common;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn next_message(client: &mut Client) -> Message {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if !matches!(message, Message::Ping(_) | Message::Pong(_)) {
            return message;
        }
    }
}

async fn next_envelope(client: &mut Client) -> Value {
    match next_message(client).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_reaches_every_member() {
    let server = common::start_server().await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        let (mut client, _) = connect_async(server.ws_url("/ws/broadcast")).await.unwrap();
        let welcome = next_envelope(&mut client).await;
        assert_eq!(welcome["type"], "welcome");
        assert!(welcome["data"]["client_id"].is_string());
        clients.push(client);
    }

    let (_, count) = common::get_json(&server, "/api/ws/clients").await;
    assert_eq!(count["data"]["clients"], 3);

    let res = common::client()
        .post(server.url("/api/broadcast"))
        .json(&json!({ "message": "maintenance at noon" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["report"]["recipients"], 3);
    assert_eq!(body["data"]["report"]["delivered"], 3);

    for client in &mut clients {
        let envelope = next_envelope(client).await;
        assert_eq!(envelope["type"], "broadcast");
        assert_eq!(envelope["data"], "maintenance at noon");
        assert!(envelope["id"].as_str().unwrap().starts_with("msg_"));
    }
}

#[tokio::test]
async fn broadcast_api_rejects_bad_json() {
    let server = common::start_server().await;

    let res = common::client()
        .post(server.url("/api/broadcast"))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn connect_replies_to_the_sender() {
    let server = common::start_server().await;
    let (mut client, _) = connect_async(server.ws_url("/ws/connect")).await.unwrap();
    assert_eq!(next_envelope(&mut client).await["type"], "welcome");

    client
        .send(Message::Text(r#"{"type":"ping","data":"hi"}"#.into()))
        .await
        .unwrap();
    let reply = next_envelope(&mut client).await;
    assert_eq!(reply["type"], "response");
}

#[tokio::test]
async fn echo_returns_frames_unchanged() {
    let server = common::start_server().await;
    let (mut client, _) = connect_async(server.ws_url("/ws/echo")).await.unwrap();

    client.send(Message::Text("ping me".into())).await.unwrap();
    assert_eq!(next_message(&mut client).await, Message::Text("ping me".into()));
}

#[tokio::test]
async fn binary_endpoint_echoes_and_answers_text_with_a_pattern() {
    let server = common::start_server().await;
    let (mut client, _) = connect_async(server.ws_url("/ws/binary")).await.unwrap();

    client
        .send(Message::Binary(vec![1u8, 2, 3].into()))
        .await
        .unwrap();
    match next_message(&mut client).await {
        Message::Binary(data) => assert_eq!(&data[..], &[1, 2, 3]),
        other => panic!("expected binary, got {other:?}"),
    }

    client.send(Message::Text("pattern".into())).await.unwrap();
    match next_message(&mut client).await {
        Message::Binary(data) => {
            assert_eq!(data.len(), 1024);
            assert_eq!(data[255], 255);
            assert_eq!(data[256], 0);
        }
        other => panic!("expected binary, got {other:?}"),
    }
}
