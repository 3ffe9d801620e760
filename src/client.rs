//! Cliente del backend de recomendación (`POST {base}/api/recommend`).
//!
//! Nunca devuelve `Err`: cualquier fallo se normaliza en
//! `RecommendationResult::Failure` con su clasificación.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::models::{
    Coordinate, ErrorKind, Place, Recommendation, RecommendationRequest, RecommendationResult,
};

/// Marca que el backend incluye cuando el servicio de mapas/búsqueda local
/// de Kakao está deshabilitado en la consola de desarrolladores.
pub const CAPABILITY_DISABLED_MARKER: &str = "OPEN_MAP_AND_LOCAL";

pub const CAPABILITY_DISABLED_GUIDANCE: &str = "카카오 로컬 API 서비스가 비활성화되어 있습니다. \
Kakao Developers 콘솔에서 'OPEN_MAP_AND_LOCAL' 서비스를 활성화해 주세요.";

pub const NETWORK_FAILURE_MESSAGE: &str = "서버에 연결할 수 없습니다. 잠시 후 다시 시도해 주세요.";

#[derive(Debug, Deserialize)]
struct RecommendResponse {
    selected_place: Option<SelectedPlace>,
    candidates_considered: u32,
    route_url: String,
}

#[derive(Debug, Deserialize)]
struct SelectedPlace {
    place_name: Option<String>,
    distance_km: f64,
    address_name: Option<String>,
    road_address_name: Option<String>,
    phone: Option<String>,
    place_url: Option<String>,
    category_name: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

/// Kakao devuelve cadenas vacías en lugar de nulos.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<SelectedPlace> for Place {
    fn from(p: SelectedPlace) -> Self {
        let location = match (p.y.as_deref(), p.x.as_deref()) {
            (Some(y), Some(x)) => match (y.parse::<f64>(), x.parse::<f64>()) {
                (Ok(lat), Ok(lng)) => Coordinate::new(lat, lng).ok(),
                _ => None,
            },
            _ => None,
        };
        Place {
            name: non_empty(p.place_name).unwrap_or_else(|| "이름 없는 장소".to_string()),
            distance_km: p.distance_km,
            address: non_empty(p.address_name),
            road_address: non_empty(p.road_address_name),
            phone: non_empty(p.phone),
            category: non_empty(p.category_name),
            place_url: non_empty(p.place_url),
            location,
        }
    }
}

/// Clasifica el cuerpo de una respuesta no exitosa.
pub fn classify_error_body(body: &str) -> RecommendationResult {
    if body.contains(CAPABILITY_DISABLED_MARKER) {
        RecommendationResult::failure(
            ErrorKind::UpstreamCapabilityDisabled,
            CAPABILITY_DISABLED_GUIDANCE,
        )
    } else {
        RecommendationResult::failure(ErrorKind::Upstream, body)
    }
}

#[derive(Clone, Debug)]
pub struct RecommendationClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl RecommendationClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let raw = format!("{}/api/recommend", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&raw)
            .map_err(|e| anyhow!("BACKEND_BASE_URL no válida '{base_url}': {e}"))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn submit(&self, request: &RecommendationRequest) -> RecommendationResult {
        debug!("POST {} ({:?})", self.endpoint, request);
        let response = match self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return network_failure(&err),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return network_failure(&err),
        };

        if !status.is_success() {
            warn!("El backend respondió {status}: {body}");
            return classify_error_body(&body);
        }

        match serde_json::from_str::<RecommendResponse>(&body) {
            Ok(parsed) => RecommendationResult::Success(Recommendation {
                selected_place: parsed.selected_place.map(Place::from),
                candidates_considered: parsed.candidates_considered,
                route_url: parsed.route_url,
            }),
            Err(err) => {
                warn!("Respuesta del backend mal formada: {err}");
                RecommendationResult::failure(
                    ErrorKind::Network,
                    format!("잘못된 응답 형식입니다: {err}"),
                )
            }
        }
    }
}

fn network_failure(err: &reqwest::Error) -> RecommendationResult {
    warn!("Fallo de red hacia el backend: {err}");
    let message = if err.is_timeout() {
        format!("{NETWORK_FAILURE_MESSAGE} (시간 초과)")
    } else {
        NETWORK_FAILURE_MESSAGE.to_string()
    };
    RecommendationResult::failure(ErrorKind::Network, message)
}
