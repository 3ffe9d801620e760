use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::{
    client::RecommendationClient,
    config::AppConfig,
    controller::{AppController, ControllerView},
    loader::{LoadStatus, LoadSubscription, ResourceLoader},
    map_sdk::HeadlessMapSdk,
    picker::{CoordinatePicker, MapView, PickCallback},
};

pub const MAP_CONTAINER_ID: &str = "run-start-map";

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub controller: Arc<AppController>,
    pub picker: Arc<CoordinatePicker>,
    pub map_sdk: Arc<HeadlessMapSdk>,
    pub map_load: Arc<LoadSubscription>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// Estado derivado que pinta la interfaz.
#[derive(Debug, Clone, Serialize)]
pub struct ViewState {
    pub map_sdk: LoadStatus,
    pub map: MapView,
    #[serde(flatten)]
    pub controller: ControllerView,
}

impl AppState {
    /// Compone loader → picker → controller. El picker sólo recibe estados
    /// del loader mientras la suscripción siga viva.
    pub fn new(
        config: AppConfig,
        loader: &ResourceLoader,
        shutdown_sender: oneshot::Sender<()>,
    ) -> Result<Self> {
        let client = match config.backend_base_url.as_deref() {
            Some(base) => {
                let client = RecommendationClient::new(base, config.request_timeout)?;
                info!("Backend de recomendación: {}", client.endpoint());
                Some(client)
            }
            None => {
                warn!("BACKEND_BASE_URL no configurada: el envío queda deshabilitado.");
                None
            }
        };
        let controller = Arc::new(AppController::new(client));

        let map_sdk = Arc::new(HeadlessMapSdk::new());
        let on_pick: PickCallback = {
            let controller = controller.clone();
            Arc::new(move |coordinate| controller.pick_coordinate(coordinate))
        };
        let picker = Arc::new(CoordinatePicker::new(
            map_sdk.clone(),
            MAP_CONTAINER_ID,
            on_pick,
        ));

        let map_load = loader.acquire(&config.map_sdk_url, config.map_app_key.as_deref());
        if let Err(err) = picker.handle_status(&map_load.status()) {
            error!("Error montando el mapa: {err}");
        }
        let watcher = picker.clone();
        map_load.on_change(move |status| {
            if let Err(err) = watcher.handle_status(status) {
                error!("Error montando el mapa: {err}");
            }
        });

        Ok(Self {
            config,
            controller,
            picker,
            map_sdk,
            map_load: Arc::new(map_load),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
        })
    }

    pub fn view(&self) -> ViewState {
        ViewState {
            map_sdk: self.map_load.status(),
            map: self.picker.view(),
            controller: self.controller.view(),
        }
    }

    pub fn teardown(&self) {
        self.picker.teardown();
        self.map_load.teardown();
    }
}
