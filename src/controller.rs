//! Controlador de la aplicación: selección del usuario, puerta de envío y
//! ciclo de vida de la petición de recomendación.
//!
//! Estados: `Idle → Submitting → (Succeeded | Failed)`. Tras resolverse, los dos
//! últimos se comportan como `Idle` (se puede volver a enviar).

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    client::RecommendationClient,
    models::{
        Coordinate, ErrorKind, Recommendation, RecommendationFailure, RecommendationRequest,
        RecommendationResult, SelectionState,
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Debug, Default)]
struct ControllerState {
    selection: SelectionState,
    phase: Phase,
    last_request: Option<RecommendationRequest>,
    result: Option<Recommendation>,
    error: Option<RecommendationFailure>,
    resolved_at: Option<DateTime<Utc>>,
}

/// Tarjeta del lugar recomendado.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceCard {
    pub name: String,
    pub distance_km: f64,
    pub round_trip_km: f64,
    pub round_trip_label: String,
    pub address: Option<String>,
    pub road_address: Option<String>,
    pub phone: Option<String>,
    pub category: Option<String>,
    pub place_url: Option<String>,
    pub route_url: String,
    /// Posición del destino para pintar su marcador, si Kakao la envió.
    pub destination: Option<Coordinate>,
    pub candidates_considered: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPanel {
    Idle,
    Loading,
    Error {
        error_kind: ErrorKind,
        message: String,
    },
    NoMatch {
        message: String,
        candidates_considered: u32,
    },
    Place(PlaceCard),
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerView {
    pub selection: SelectionState,
    pub phase: Phase,
    pub backend_configured: bool,
    pub can_submit: bool,
    pub loading: bool,
    pub panel: ResultPanel,
    pub resolved_at: Option<DateTime<Utc>>,
}

fn round_tenth(km: f64) -> f64 {
    (km * 10.0).round() / 10.0
}

pub struct AppController {
    client: Option<RecommendationClient>,
    state: Mutex<ControllerState>,
}

impl AppController {
    /// Sin cliente (falta `BACKEND_BASE_URL`) el envío queda deshabilitado.
    pub fn new(client: Option<RecommendationClient>) -> Self {
        Self {
            client,
            state: Mutex::new(ControllerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- Entradas del formulario (aceptadas en cualquier estado) ---

    pub fn pick_coordinate(&self, coordinate: Coordinate) {
        debug!("Coordenada elegida: {:.5}, {:.5}", coordinate.lat, coordinate.lng);
        self.state().selection.coordinate = Some(coordinate);
    }

    pub fn set_distance(&self, distance_km: f64) {
        self.state().selection.distance_km = distance_km;
    }

    pub fn set_theme(&self, theme: impl Into<String>) {
        self.state().selection.theme = theme.into();
    }

    #[cfg(test)]
    pub fn selection(&self) -> SelectionState {
        self.state().selection.clone()
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    fn gate_open(&self, state: &ControllerState) -> bool {
        self.client.is_some()
            && state.phase != Phase::Submitting
            && state.selection.to_request().is_some()
    }

    #[cfg(test)]
    pub fn can_submit(&self) -> bool {
        let state = self.state();
        self.gate_open(&state)
    }

    /// Lanza la petición si la puerta está abierta; si no, no hace nada.
    /// Devuelve la tarea que resolverá la petición.
    pub fn submit(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let client = self.client.clone()?;
        let request = {
            let mut state = self.state();
            if !self.gate_open(&state) {
                return None;
            }
            let request = state.selection.to_request()?;
            state.phase = Phase::Submitting;
            state.result = None;
            state.error = None;
            state.resolved_at = None;
            state.last_request = Some(request.clone());
            request
        };

        let request_id = Uuid::new_v4();
        info!(
            %request_id,
            "Pidiendo recomendación: tema '{}', {} km",
            request.theme_keyword,
            request.distance_km
        );

        let controller = Arc::clone(self);
        Some(tokio::spawn(async move {
            let outcome = client.submit(&request).await;
            controller.resolve(request_id, outcome);
        }))
    }

    fn resolve(&self, request_id: Uuid, outcome: RecommendationResult) {
        let mut state = self.state();
        state.resolved_at = Some(Utc::now());
        match outcome {
            RecommendationResult::Success(rec) => {
                info!(
                    %request_id,
                    "Recomendación recibida ({} candidatos)",
                    rec.candidates_considered
                );
                state.result = Some(rec);
                state.phase = Phase::Succeeded;
            }
            RecommendationResult::Failure(failure) => {
                warn!(%request_id, "Recomendación fallida ({:?}): {}", failure.kind, failure.message);
                state.error = Some(failure);
                state.phase = Phase::Failed;
            }
        }
    }

    pub fn view(&self) -> ControllerView {
        let state = self.state();
        let panel = match state.phase {
            Phase::Idle => ResultPanel::Idle,
            Phase::Submitting => ResultPanel::Loading,
            Phase::Failed => match &state.error {
                Some(f) => ResultPanel::Error {
                    error_kind: f.kind,
                    message: f.message.clone(),
                },
                None => ResultPanel::Idle,
            },
            Phase::Succeeded => match &state.result {
                Some(rec) => render_result(rec, state.last_request.as_ref()),
                None => ResultPanel::Idle,
            },
        };

        ControllerView {
            selection: state.selection.clone(),
            phase: state.phase,
            backend_configured: self.client.is_some(),
            can_submit: self.gate_open(&state),
            loading: state.phase == Phase::Submitting,
            panel,
            resolved_at: state.resolved_at,
        }
    }
}

fn render_result(rec: &Recommendation, request: Option<&RecommendationRequest>) -> ResultPanel {
    match &rec.selected_place {
        None => {
            let theme = request.map(|r| r.theme_keyword.as_str()).unwrap_or("");
            ResultPanel::NoMatch {
                message: format!("'{theme}' 테마에 맞는 장소를 찾지 못했습니다. 거리나 테마를 바꿔 보세요."),
                candidates_considered: rec.candidates_considered,
            }
        }
        Some(place) => {
            let round_trip_km = round_tenth(place.round_trip_km());
            ResultPanel::Place(PlaceCard {
                name: place.name.clone(),
                distance_km: place.distance_km,
                round_trip_km,
                round_trip_label: format!("왕복 {round_trip_km:.1}km"),
                address: place.address.clone(),
                road_address: place.road_address.clone(),
                phone: place.phone.clone(),
                category: place.category.clone(),
                place_url: place.place_url.clone(),
                route_url: rec.route_url.clone(),
                destination: place.location,
                candidates_considered: rec.candidates_considered,
            })
        }
    }
}
