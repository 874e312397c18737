//! Tool calls over the HTTP transport

use pyexec_tests::common::*;
use pyexec_transport::{build_dispatcher, http_server, McpHandler};
use serde_json::{json, Value};
use std::sync::Arc;

struct TestServer {
    base: String,
    task: tokio::task::JoinHandle<()>,
    _scratch: Scratch,
}

impl TestServer {
    async fn start() -> Self {
        let scratch = Scratch::new();
        let handler = Arc::new(McpHandler::new(
            build_dispatcher(&shell_config(&scratch)).unwrap(),
        ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let _ = http_server::start_server(listener, handler).await;
        });
        Self {
            base,
            task,
            _scratch: scratch,
        }
    }

    async fn post(&self, body: Value) -> (u16, Option<Value>) {
        let response = reqwest::Client::new()
            .post(format!("{}/mcp", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        let text = response.text().await.unwrap();
        let json = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).unwrap())
        };
        (status, json)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start().await;
    let body: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_execute_over_http() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post(json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": { "name": "execute_python", "arguments": { "code": "echo from-http" } }
        }))
        .await;
    assert_eq!(status, 200);
    let body = body.unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["structuredContent"]["stdout"], "from-http\n");
}

#[tokio::test]
async fn test_notification_is_accepted_without_body() {
    let server = TestServer::start().await;
    let (status, body) = server
        .post(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;
    assert_eq!(status, 202);
    assert!(body.is_none());
}

#[tokio::test]
async fn test_malformed_body_is_a_parse_error() {
    let server = TestServer::start().await;
    let response = reqwest::Client::new()
        .post(format!("{}/mcp", server.base))
        .header("content-type", "application/json")
        .body("{\"jsonrpc\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn test_environment_info_over_http() {
    let server = TestServer::start().await;
    let (_, body) = server
        .post(json!({
            "jsonrpc": "2.0", "id": "env", "method": "tools/call",
            "params": { "name": "get_environment_info" }
        }))
        .await;
    let snapshot = &body.unwrap()["result"]["structuredContent"];
    assert_eq!(snapshot["temp_dir_writable"], true);
    assert!(snapshot["platform"].as_str().is_some());
}
