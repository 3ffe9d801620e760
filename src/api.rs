use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::{AppState, ViewState},
    models::Coordinate,
};

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct ClickPayload {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
pub struct DistancePayload {
    distance_km: f64,
}

#[derive(Deserialize)]
pub struct ThemePayload {
    theme: String,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/ui/state", get(state_handler))
        .route("/api/ui/click", post(click_handler))
        .route("/api/ui/distance", post(distance_handler))
        .route("/api/ui/theme", post(theme_handler))
        .route("/api/ui/submit", post(submit_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "map_key_configured": state.config.map_app_key.is_some(),
        "backend_configured": state.config.backend_base_url.is_some(),
    }))
}

#[axum::debug_handler]
async fn state_handler(State(state): State<AppState>) -> Json<ViewState> {
    Json(state.view())
}

/// Clic del usuario sobre el mapa montado.
#[axum::debug_handler]
async fn click_handler(
    State(state): State<AppState>,
    Json(payload): Json<ClickPayload>,
) -> Result<Json<ViewState>, ApiError> {
    let coordinate = Coordinate::new(payload.lat, payload.lng).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        )
    })?;

    if !state.picker.is_mounted() {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "El mapa no está disponible.", "map": state.picker.view()})),
        ));
    }

    state
        .map_sdk
        .click_container(state.picker.container(), coordinate)
        .map_err(|e| {
            error!("Error despachando el clic: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        })?;

    Ok(Json(state.view()))
}

#[axum::debug_handler]
async fn distance_handler(
    State(state): State<AppState>,
    Json(payload): Json<DistancePayload>,
) -> Json<ViewState> {
    state.controller.set_distance(payload.distance_km);
    Json(state.view())
}

#[axum::debug_handler]
async fn theme_handler(
    State(state): State<AppState>,
    Json(payload): Json<ThemePayload>,
) -> Json<ViewState> {
    state.controller.set_theme(payload.theme);
    Json(state.view())
}

/// 202 si se lanzó la petición; 409 si el botón estaba deshabilitado.
#[axum::debug_handler]
async fn submit_handler(State(state): State<AppState>) -> (StatusCode, Json<ViewState>) {
    let status = match state.controller.submit() {
        Some(_) => StatusCode::ACCEPTED,
        None => StatusCode::CONFLICT,
    };
    (status, Json(state.view()))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
    {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::tests::fake_backend,
        config::AppConfig,
        loader::{tests::FakeHost, LoadRegistry, LoadStatus, PollPolicy, ResourceLoader},
    };
    use axum::{body::to_bytes, http::Request};
    use serde_json::Value;
    use std::sync::{atomic::Ordering, Arc};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    fn config(key: Option<&str>, backend: Option<String>) -> AppConfig {
        AppConfig {
            map_app_key: key.map(str::to_string),
            backend_base_url: backend,
            map_sdk_url: "https://sdk.test/v2/maps/sdk.js".into(),
            server_addr: "127.0.0.1:0".into(),
            request_timeout: Duration::from_secs(2),
            sdk_script_timeout: Duration::from_secs(2),
            sdk_poll_interval: Duration::from_millis(5),
            sdk_poll_max_attempts: 10,
        }
    }

    fn state_with(cfg: AppConfig, host: Arc<FakeHost>) -> (AppState, oneshot::Receiver<()>) {
        let loader = ResourceLoader::with_registry(
            host,
            Arc::new(LoadRegistry::default()),
            PollPolicy::default(),
        );
        let (tx, rx) = oneshot::channel();
        (AppState::new(cfg, &loader, tx).unwrap(), rx)
    }

    fn ready_host() -> Arc<FakeHost> {
        let host = FakeHost::explicit();
        host.ready.store(true, Ordering::SeqCst);
        Arc::new(host)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => axum::body::Body::from(v.to_string()),
                None => axum::body::Body::empty(),
            })
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn missing_key_never_mounts_a_map() {
        let host = ready_host();
        let (state, _rx) = state_with(config(None, None), host.clone());
        let router = create_router(state.clone());

        let (status, view) = call(&router, "GET", "/api/ui/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["map_sdk"]["state"], "failed");
        assert_eq!(view["map_sdk"]["reason"], "missing key");
        assert_eq!(view["map"]["state"], "unavailable");
        assert_eq!(state.map_sdk.map_count(state.picker.container()), 0);
        assert_eq!(host.inserts.load(Ordering::SeqCst), 0);

        let (status, _) = call(
            &router,
            "POST",
            "/api/ui/click",
            Some(json!({"lat": 37.5665, "lng": 126.978})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn full_flow_from_click_to_place() {
        let backend = fake_backend(Router::new().route(
            "/api/recommend",
            post(|| async {
                Json(json!({
                    "selected_place": {"place_name": "Cafe X", "distance_km": 2.3, "x": "126.99", "y": "37.58"},
                    "candidates_considered": 4,
                    "route_url": "https://map.kakao.com/link/by/walk/Start,37.5665,126.978/Cafe X,37.58,126.99"
                }))
            }),
        ))
        .await;
        let (state, _rx) = state_with(config(Some("key"), Some(backend)), ready_host());
        let router = create_router(state.clone());

        let (_, view) = call(&router, "GET", "/api/ui/state", None).await;
        assert_eq!(view["map"]["state"], "ready");
        assert_eq!(view["can_submit"], false);

        let (status, _) = call(&router, "POST", "/api/ui/submit", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, view) = call(
            &router,
            "POST",
            "/api/ui/click",
            Some(json!({"lat": 37.5665, "lng": 126.978})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["selection"]["coordinate"]["lat"], 37.5665);
        assert_eq!(view["map"]["marker"]["lng"], 126.978);

        call(&router, "POST", "/api/ui/distance", Some(json!({"distance_km": 5.0}))).await;
        let (_, view) = call(&router, "POST", "/api/ui/theme", Some(json!({"theme": "카페"}))).await;
        assert_eq!(view["can_submit"], true);

        let (status, view) = call(&router, "POST", "/api/ui/submit", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(view["loading"], true);
        assert_eq!(view["panel"]["kind"], "loading");

        let mut panel = Value::Null;
        for _ in 0..100 {
            let (_, view) = call(&router, "GET", "/api/ui/state", None).await;
            if view["loading"] == false {
                panel = view["panel"].clone();
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(panel["kind"], "place");
        assert_eq!(panel["name"], "Cafe X");
        assert_eq!(panel["round_trip_km"], 4.6);
        assert_eq!(panel["destination"]["lat"], 37.58);
    }

    #[tokio::test]
    async fn map_mounts_once_the_sdk_finishes_loading() {
        let host = Arc::new(FakeHost::explicit());
        let (state, _rx) = state_with(config(Some("key"), None), host.clone());
        let router = create_router(state.clone());

        let (_, view) = call(&router, "GET", "/api/ui/state", None).await;
        assert_eq!(view["map_sdk"]["state"], "pending");
        assert_eq!(view["map"]["state"], "loading");
        let (status, _) = call(
            &router,
            "POST",
            "/api/ui/click",
            Some(json!({"lat": 37.5665, "lng": 126.978})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        assert_eq!(state.map_load.settled().await, LoadStatus::Ready);
        let mut view = Value::Null;
        for _ in 0..100 {
            view = call(&router, "GET", "/api/ui/state", None).await.1;
            if view["map"]["state"] == "ready" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(view["map"]["state"], "ready");
        assert_eq!(host.inserts.load(Ordering::SeqCst), 1);
        assert_eq!(host.inits.load(Ordering::SeqCst), 1);

        let (status, view) = call(
            &router,
            "POST",
            "/api/ui/click",
            Some(json!({"lat": 37.57, "lng": 126.98})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["selection"]["coordinate"]["lat"], 37.57);
        assert_eq!(view["map"]["marker"]["lng"], 126.98);
        assert_eq!(state.map_sdk.map_count(state.picker.container()), 1);
    }

    #[tokio::test]
    async fn out_of_range_click_is_rejected() {
        let (state, _rx) = state_with(config(Some("key"), None), ready_host());
        let router = create_router(state);

        let (status, body) = call(
            &router,
            "POST",
            "/api/ui/click",
            Some(json!({"lat": 95.0, "lng": 0.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("95"));
    }

    #[tokio::test]
    async fn shutdown_fires_once() {
        let (state, rx) = state_with(config(Some("key"), None), ready_host());
        let router = create_router(state);

        let (status, _) = call(&router, "POST", "/api/shutdown", None).await;
        assert_eq!(status, StatusCode::OK);
        tokio_test::assert_ok!(rx.await);

        let (status, _) = call(&router, "POST", "/api/shutdown", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_configuration() {
        let (state, _rx) = state_with(config(None, None), ready_host());
        let (status, body) = call(&create_router(state), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["map_key_configured"], false);
    }
}
