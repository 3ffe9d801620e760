//! Modelos de dominio (coordenadas, selección del usuario y recomendaciones).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Punto geográfico elegido con un clic sobre el mapa.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum CoordinateError {
    #[error("latitud fuera de rango [-90, 90]: {0}")]
    Latitude(f64),
    #[error("longitud fuera de rango [-180, 180]: {0}")]
    Longitude(f64),
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        // Los NaN también fallan: ninguna comparación de rango es cierta.
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::Latitude(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinateError::Longitude(lng));
        }
        Ok(Self { lat, lng })
    }
}

/// Estado del formulario. Lo posee en exclusiva el `AppController`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionState {
    pub coordinate: Option<Coordinate>,
    pub distance_km: f64,
    pub theme: String,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            coordinate: None,
            distance_km: 5.0,
            theme: String::new(),
        }
    }
}

impl SelectionState {
    /// Devuelve la petición sólo si la selección está completa:
    /// coordenada fijada, distancia > 0 y tema no vacío tras recortar.
    pub fn to_request(&self) -> Option<RecommendationRequest> {
        let coordinate = self.coordinate?;
        let theme = self.theme.trim();
        if !(self.distance_km > 0.0) || !self.distance_km.is_finite() || theme.is_empty() {
            return None;
        }
        Some(RecommendationRequest {
            start_lat: coordinate.lat,
            start_lng: coordinate.lng,
            distance_km: self.distance_km,
            theme_keyword: theme.to_string(),
        })
    }
}

/// Instantánea inmutable de la selección en el momento del envío.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationRequest {
    pub start_lat: f64,
    pub start_lng: f64,
    pub distance_km: f64,
    pub theme_keyword: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    pub name: String,
    /// Distancia de ida desde el punto de salida.
    pub distance_km: f64,
    pub address: Option<String>,
    pub road_address: Option<String>,
    pub phone: Option<String>,
    pub category: Option<String>,
    pub place_url: Option<String>,
    pub location: Option<Coordinate>,
}

impl Place {
    pub fn round_trip_km(&self) -> f64 {
        self.distance_km * 2.0
    }
}

/// Respuesta correcta del backend. `selected_place == None` es un
/// resultado vacío válido, no un error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub selected_place: Option<Place>,
    pub candidates_considered: u32,
    pub route_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UpstreamCapabilityDisabled,
    Upstream,
    Network,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationResult {
    Success(Recommendation),
    Failure(RecommendationFailure),
}

impl RecommendationResult {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure(RecommendationFailure {
            kind,
            message: message.into(),
        })
    }
}
