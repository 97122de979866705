//! Shared utilities for integration tests.

use std::net::SocketAddr;

use proxy_testbed::{HarnessConfig, HttpServer, Shutdown};
use serde_json::Value;
use tokio::net::TcpListener;

/// A testbed bound to an ephemeral port. Dropping it stops the server.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    #[allow(dead_code)]
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a testbed with the default configuration.
pub async fn start_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(HarnessConfig::default(), shutdown.subscribe());
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });

    TestServer { addr, shutdown }
}

/// HTTP client that never routes loopback traffic through an ambient proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// GET `path` and return the decoded JSON envelope.
#[allow(dead_code)]
pub async fn get_json(server: &TestServer, path: &str) -> (u16, Value) {
    let res = client().get(server.url(path)).send().await.unwrap();
    let status = res.status().as_u16();
    (status, res.json().await.unwrap())
}
