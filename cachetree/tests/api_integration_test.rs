//! Integration tests for the HTTP control surface

use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use cachetree::api::ApiServer;
use cachetree_core::{CacheSystem, FallbackPolicy, SystemConfig};

/// Test helper to start the API server in the background; returns its base URL
async fn start_test_server(config: SystemConfig) -> String {
    let system = Arc::new(CacheSystem::start(config).await.unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let server = ApiServer::with_defaults(system);
        let _ = server.serve(listener).await;
    });

    format!("http://{}", addr)
}

fn test_config() -> SystemConfig {
    SystemConfig::builder()
        .seed(11)
        .fallback(FallbackPolicy::FailFast)
        .read_timeout(Duration::from_millis(300))
        .write_timeout(Duration::from_millis(300))
        .build()
}

#[tokio::test]
async fn test_health_check() {
    let base = start_test_server(test_config()).await;

    let response = Client::new()
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_list_node_groups() {
    let base = start_test_server(test_config()).await;
    let client = Client::new();

    for (group, count) in [("clients", 8), ("l2caches", 4), ("l1caches", 2)] {
        let body: serde_json::Value = client
            .get(format!("{}/nodes/{}", base, group))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["count"], count);
        assert_eq!(body["nodes"].as_array().unwrap().len(), count);
    }
}

#[tokio::test]
async fn test_read_write_through_clients() {
    let base = start_test_server(test_config()).await;
    let client = Client::new();

    let store: serde_json::Value = client
        .get(format!("{}/store", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(store["entries"].as_array().unwrap().len(), 10);

    let response = client
        .put(format!("{}/clients/client3/keys/5", base))
        .json(&json!({ "value": 77 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let written: serde_json::Value = response.json().await.unwrap();
    assert_eq!(written["value"], 77);
    assert_eq!(written["version"], 2);

    // Sibling subtree sees the write once the push lands
    let mut value = serde_json::Value::Null;
    for _ in 0..50 {
        let body: serde_json::Value = client
            .get(format!("{}/clients/client6/keys/5", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        value = body["value"].clone();
        if value == 77 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(value, 77);

    let response = client
        .get(format!("{}/clients/client0/keys/500", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_crash_and_recover_over_http() {
    let base = start_test_server(test_config()).await;
    let client = Client::new();

    let response = client
        .post(format!("{}/nodes/l1cache0/crash", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let listing: serde_json::Value = client
        .get(format!("{}/nodes/l1caches", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["nodes"][0]["liveness"], "crashed");
    assert_eq!(listing["nodes"][1]["liveness"], "normal");

    let response = client
        .get(format!("{}/clients/client0/keys/5", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let response = client
        .post(format!("{}/nodes/l1cache0/recover", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .get(format!("{}/clients/client0/keys/5", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats: serde_json::Value = client
        .get(format!("{}/nodes/l1cache0/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["crashes"], 1);
    assert_eq!(stats["recoveries"], 1);

    let response = client
        .post(format!("{}/nodes/l1cache7/crash", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clear_store() {
    let base = start_test_server(test_config()).await;
    let client = Client::new();

    let response = client.delete(format!("{}/store", base)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let store: serde_json::Value = client
        .get(format!("{}/store", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(store["entries"].as_array().unwrap().is_empty());

    let response = client
        .get(format!("{}/clients/client1/keys/2", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
