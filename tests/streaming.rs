//! Chunked transfers and streams against a live testbed.

use bytes::Bytes;
use futures_util::stream;
use proxy_testbed::transfer::{encode_chunk, encode_terminator, ChunkDecoder};
use serde_json::Value;

mod common;

fn chunked_body(parts: Vec<Bytes>) -> reqwest::Body {
    let frames: Vec<Result<Bytes, std::io::Error>> = parts.into_iter().map(Ok).collect();
    reqwest::Body::wrap_stream(stream::iter(frames))
}

#[tokio::test]
async fn chunked_download_decodes_in_order() {
    let server = common::start_server().await;

    let res = common::client()
        .get(server.url("/api/transfer/chunked?chunks=3&delay=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "application/json");
    let body = res.bytes().await.unwrap();

    let mut decoder = ChunkDecoder::new(&body[..]);
    let mut ids = Vec::new();
    while let Some(chunk) = decoder.next_chunk().await.unwrap() {
        let value: Value = serde_json::from_slice(&chunk.payload).unwrap();
        ids.push(value["chunk_id"].as_u64().unwrap());
    }
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(decoder.is_finished());
}

#[tokio::test]
async fn chunked_upload_is_echoed() {
    let server = common::start_server().await;
    let body = chunked_body(vec![
        encode_chunk(b"hello "),
        encode_chunk(b"proxy"),
        encode_terminator(),
    ]);

    let res = common::client()
        .post(server.url("/api/transfer/chunked"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let json: Value = res.json().await.unwrap();
    assert_eq!(json["code"], 200);
    assert_eq!(json["data"]["is_chunked"], true);
    assert_eq!(json["data"]["chunk_count"], 2);
    assert_eq!(json["data"]["total_size"], 11);
    assert_eq!(json["data"]["received_data"], "hello proxy");
}

#[tokio::test]
async fn malformed_chunk_size_is_rejected() {
    let server = common::start_server().await;
    let body = chunked_body(vec![Bytes::from_static(b"zz\r\nabc\r\n")]);

    let res = common::client()
        .post(server.url("/api/transfer/chunked"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    let json: Value = res.json().await.unwrap();
    assert_eq!(json["code"], 400);
    assert!(json.get("data").is_none());
}

#[tokio::test]
async fn payload_longer_than_declared_is_rejected() {
    let server = common::start_server().await;
    let body = chunked_body(vec![Bytes::from_static(b"3\r\nabcXX\r\n0\r\n\r\n")]);

    let res = common::client()
        .post(server.url("/api/transfer/chunked/upload"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn plain_upload_to_chunked_only_endpoint_is_rejected() {
    let server = common::start_server().await;

    let res = common::client()
        .post(server.url("/api/transfer/chunked/upload"))
        .body("not chunked")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn line_stream_emits_requested_lines() {
    let server = common::start_server().await;

    let res = common::client()
        .get(server.url("/api/stream/3"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let text = res.text().await.unwrap();

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("line 1 - timestamp: "));
    assert!(lines[2].starts_with("line 3 - timestamp: "));
}

#[tokio::test]
async fn sse_stream_ends_with_done() {
    let server = common::start_server().await;

    let res = common::client()
        .get(server.url("/api/sse?count=2&interval=100"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["content-type"], "text/event-stream");
    assert_eq!(res.headers()["cache-control"], "no-cache");
    let text = res.text().await.unwrap();

    let events: Vec<&str> = text.split("\n\n").filter(|e| !e.is_empty()).collect();
    assert_eq!(events.len(), 3);
    assert!(events[0].starts_with("data: {"));
    assert_eq!(events[2], "data: [DONE]");
}

#[tokio::test]
async fn large_download_has_requested_size() {
    let server = common::start_server().await;

    let body = common::client()
        .get(server.url("/api/transfer/large/1"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.len(), 1024 * 1024);
    assert_eq!(body[0], 0);
    assert_eq!(body[257], 1);
}

#[tokio::test]
async fn request_echo_reports_repeated_query_keys() {
    let server = common::start_server().await;

    let (status, json) = common::get_json(&server, "/api/test?tag=a&tag=b&single=1").await;
    assert_eq!(status, 200);
    assert_eq!(json["data"]["method"], "GET");
    assert_eq!(json["data"]["query"]["tag"], serde_json::json!(["a", "b"]));
    assert_eq!(json["data"]["query"]["single"], "1");
}
