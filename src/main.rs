// Módulos de la aplicación
mod api;
mod app_state;
mod client;
mod config;
mod controller;
mod loader;
mod map_sdk;
mod models;
mod picker;
mod script_host;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    app_state::AppState,
    loader::{LoadStatus, PollPolicy, ResourceLoader},
    script_host::HttpScriptHost,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Loader del SDK de mapas (registro global del proceso)
    let host = HttpScriptHost::new(cfg.sdk_script_timeout)
        .context("Error creando el cliente HTTP del SDK")?;
    let loader = ResourceLoader::new(
        Arc::new(host),
        PollPolicy {
            interval: cfg.sdk_poll_interval,
            max_attempts: cfg.sdk_poll_max_attempts,
        },
    );

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 4. Componer mapa, selector y controlador
    let app_state = AppState::new(cfg.clone(), &loader, shutdown_tx)
        .context("Error inicializando el estado de la aplicación")?;

    // Dejar constancia de cómo termina la carga del SDK.
    let map_load = app_state.map_load.clone();
    tokio::spawn(async move {
        match map_load.settled().await {
            LoadStatus::Ready => info!("SDK de mapas listo ({})", map_load.url()),
            LoadStatus::Failed(reason) => warn!("SDK de mapas no disponible ({}): {reason}", map_load.url()),
            LoadStatus::Pending => {}
        }
    });

    // 5. Configurar el router de la API
    let app = api::create_router(app_state.clone()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 6. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    app_state.teardown();
    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
