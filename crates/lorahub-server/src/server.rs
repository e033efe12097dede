use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use lorahub_core::HubStorage;

use crate::api;
use crate::connection;
use crate::dispatcher::CommandDispatcher;
use crate::liveness::{LivenessConfig, LivenessMonitor};
use crate::registry::ConnectionRegistry;
use crate::router;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub ping_interval: Duration,
    pub liveness: LivenessConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 256,
            ping_interval: Duration::from_secs(30),
            liveness: LivenessConfig::default(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<router::Router>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub storage: Arc<dyn HubStorage>,
    pub started_at: Instant,
    pub ping_interval: Duration,
}

impl AppState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        storage: Arc<dyn HubStorage>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            router: Arc::new(router::Router::new(Arc::clone(&registry), Arc::clone(&storage))),
            dispatcher: Arc::new(CommandDispatcher::new(Arc::clone(&registry))),
            registry,
            storage,
            started_at: Instant::now(),
            ping_interval,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(api::health))
        .route("/api/sensor-data", post(api::ingest_sensor_data))
        .route("/api/sensor-data/latest", get(api::latest_readings))
        .route("/api/sensor-data/node/{node_id}", get(api::node_readings))
        .route("/api/sensor-data/voltage/{node_id}", get(api::voltage_history))
        .route("/api/send-command", post(api::send_command))
        .route("/api/gateways", get(api::gateways))
        .route("/api/active-nodes", get(api::active_nodes))
        .route("/api/connections", get(api::connections))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    storage: Arc<dyn HubStorage>,
) -> Result<ServerHandle, std::io::Error> {
    start_with_shutdown(config, storage, std::future::pending()).await
}

/// Like [`start`], but the server drains and exits once `shutdown` resolves.
pub async fn start_with_shutdown<F>(
    config: ServerConfig,
    storage: Arc<dyn HubStorage>,
    shutdown: F,
) -> Result<ServerHandle, std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let state = AppState::new(Arc::clone(&registry), storage, config.ping_interval);

    let liveness = LivenessMonitor::new(Arc::clone(&registry), config.liveness).spawn();

    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        host = %config.host,
        port = local_addr.port(),
        heartbeat_timeout_secs = config.liveness.heartbeat_timeout.as_secs(),
        "LoRa hub started"
    );

    let server = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        server,
        liveness,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    registry: Arc<ConnectionRegistry>,
    server: tokio::task::JoinHandle<()>,
    liveness: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Wait for the server to finish, then stop the liveness task.
    pub async fn join(self) {
        if let Err(e) = self.server.await {
            tracing::error!(error = %e, "server task failed");
        }
        self.liveness.abort();
        tracing::info!("LoRa hub stopped");
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsParams {
    role: Option<String>,
}

/// WebSocket upgrade handler, mounted on `/` and `/ws`.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let as_observer = params.role.as_deref() == Some("observer");
    ws.on_upgrade(move |socket| {
        connection::handle_ws_connection(
            socket,
            Some(peer.to_string()),
            as_observer,
            state.registry,
            state.router,
            state.ping_interval,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorahub_store::{Database, SqliteHubStorage};
    use serde_json::{json, Value};

    fn storage() -> Arc<dyn HubStorage> {
        Arc::new(SqliteHubStorage::new(Database::in_memory().unwrap()))
    }

    async fn start_test_server() -> ServerHandle {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0, // Random port
            ..Default::default()
        };
        start(config, storage()).await.unwrap()
    }

    fn url(handle: &ServerHandle, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", handle.port, path)
    }

    #[test]
    fn default_config_matches_deployment() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_send_queue, 256);
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.liveness.heartbeat_timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let registry = Arc::new(ConnectionRegistry::new(32));
        let state = AppState::new(registry, storage(), Duration::from_secs(30));
        let _router = build_router(state);
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start_test_server().await;
        assert!(handle.port > 0);

        let resp = reqwest::get(url(&handle, "/health")).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert!(body["uptime"].is_number());
        assert!(body["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn posted_sensor_data_is_stored_and_queryable() {
        let handle = start_test_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(url(&handle, "/api/sensor-data"))
            .json(&json!({ "nodeId": 4, "voltage": 3.7, "messageType": "voltage_reading", "timestamp": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["stored"], true);
        assert_eq!(body["delivered"], 0);

        let latest: Value = reqwest::get(url(&handle, "/api/sensor-data/latest?limit=5"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(latest.as_array().unwrap().len(), 1);
        assert_eq!(latest[0]["nodeId"], 4);

        let by_node: Value = reqwest::get(url(&handle, "/api/sensor-data/node/4"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(by_node.as_array().unwrap().len(), 1);

        let other: Value = reqwest::get(url(&handle, "/api/sensor-data/node/5"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(other.as_array().unwrap().is_empty());

        let voltage: Value = reqwest::get(url(&handle, "/api/sensor-data/voltage/4?hours=1"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(voltage[0]["voltage"], 3.7);
    }

    #[tokio::test]
    async fn voltage_window_beyond_calendar_is_400() {
        let handle = start_test_server().await;
        let resp = reqwest::get(url(&handle, "/api/sensor-data/voltage/1?hours=4294967295"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("hours"));

        // The server keeps serving after the rejected request.
        let ok = reqwest::get(url(&handle, "/api/sensor-data/voltage/1?hours=48"))
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
    }

    #[tokio::test]
    async fn non_object_sensor_body_is_rejected() {
        let handle = start_test_server().await;
        let resp = reqwest::Client::new()
            .post(url(&handle, "/api/sensor-data"))
            .json(&json!([1, 2, 3]))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn command_without_gateways_is_503() {
        let handle = start_test_server().await;
        let resp = reqwest::Client::new()
            .post(url(&handle, "/api/send-command"))
            .json(&json!({ "nodeId": 7, "message": "reset" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "No gateways connected");
    }

    #[tokio::test]
    async fn command_with_invalid_body_is_400() {
        let handle = start_test_server().await;
        let resp = reqwest::Client::new()
            .post(url(&handle, "/api/send-command"))
            .json(&json!({ "message": "reset" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn command_reaches_registered_gateway() {
        let handle = start_test_server().await;
        let registry = Arc::clone(handle.registry());
        let (gw, mut rx) = registry.register(None);
        registry.update_role(&gw, lorahub_core::Role::Gateway, Some("gw-1".into()));

        let resp = reqwest::Client::new()
            .post(url(&handle, "/api/send-command"))
            .json(&json!({ "nodeId": 7, "message": "reset" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["gateways_notified"], 1);

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "send_to_node");
        assert_eq!(frame["nodeId"], 7);
    }

    #[tokio::test]
    async fn connections_and_gateways_reflect_registry() {
        let handle = start_test_server().await;
        let registry = Arc::clone(handle.registry());
        let (gw, _rx) = registry.register(Some("10.0.0.2:5000".into()));
        registry.update_role(&gw, lorahub_core::Role::Gateway, Some("gw-1".into()));

        let conns: Value = reqwest::get(url(&handle, "/api/connections"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(conns[0]["id"], gw.as_str());
        assert_eq!(conns[0]["type"], "gateway");
        assert_eq!(conns[0]["gatewayId"], "gw-1");
        assert_eq!(conns[0]["remoteAddr"], "10.0.0.2:5000");

        // Not yet persisted: the role was set directly, not via the router.
        let gateways: Value = reqwest::get(url(&handle, "/api/gateways"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(gateways.as_array().unwrap().is_empty());

        let active: Value = reqwest::get(url(&handle, "/api/active-nodes"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(active["activeNodeCount"], 0);
    }
}
