//! API server for the cache tree

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use cachetree_core::CacheSystem;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use super::routes::{
    clear_store, crash_node, dump_node, dump_store, health_check, list_nodes, node_stats,
    read_key, recover_node, write_key, AppState,
};

/// Configuration for the API server
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    system: Arc<CacheSystem>,
}

impl ApiServer {
    /// Create a new API server with configuration
    pub fn new(config: ApiServerConfig, system: Arc<CacheSystem>) -> Self {
        Self { config, system }
    }

    /// Create a new API server with default configuration
    pub fn with_defaults(system: Arc<CacheSystem>) -> Self {
        Self::new(ApiServerConfig::default(), system)
    }

    /// Router with every control route
    pub fn router(&self) -> Router {
        let app_state = Arc::new(AppState {
            system: Arc::clone(&self.system),
        });

        Router::new()
            .route("/health", get(health_check))
            .route("/nodes/:name", get(list_nodes))
            .route("/nodes/:name/crash", post(crash_node))
            .route("/nodes/:name/recover", post(recover_node))
            .route("/nodes/:name/dump", get(dump_node))
            .route("/nodes/:name/stats", get(node_stats))
            .route("/clients/:name/keys/:key", get(read_key).put(write_key))
            .route("/store", get(dump_store).delete(clear_store))
            .with_state(app_state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve
    pub async fn start(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("Starting API server on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use cachetree_core::SystemConfig;
    use tower::ServiceExt;

    async fn router() -> Router {
        let system = CacheSystem::start(SystemConfig::builder().seed(3).build())
            .await
            .unwrap();
        ApiServer::with_defaults(Arc::new(system)).router()
    }

    async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_and_listing() {
        let router = router().await;

        let (status, body) = call(&router, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["nodes"], 15);

        let (status, body) = call(&router, "GET", "/nodes/l2caches").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 4);
        assert_eq!(body["nodes"][0]["id"], "l2cache0");

        let (status, _) = call(&router, "GET", "/nodes/everything").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_crash_unknown_and_unsupported() {
        let router = router().await;

        let (status, _) = call(&router, "POST", "/nodes/l1cache0/crash").await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&router, "GET", "/nodes/l1cache0/dump").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["liveness"], "crashed");

        let (status, _) = call(&router, "POST", "/nodes/l1cache42/crash").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&router, "POST", "/nodes/store/recover").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
