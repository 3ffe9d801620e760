//! Carga y gestión de configuración de la aplicación (SDK de mapas + backend).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

pub const DEFAULT_MAP_SDK_URL: &str = "https://dapi.kakao.com/v2/maps/sdk.js";

/// Configuración completa de la aplicación.
///
/// La clave del mapa y la URL del backend son opcionales a propósito:
/// su ausencia no impide arrancar, sólo deja el mapa o el envío deshabilitados.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub map_app_key: Option<String>,
    pub backend_base_url: Option<String>,
    pub map_sdk_url: String,
    pub server_addr: String,

    pub request_timeout: Duration,
    pub sdk_script_timeout: Duration,
    pub sdk_poll_interval: Duration,
    pub sdk_poll_max_attempts: u32,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let map_app_key = non_empty_var("KAKAO_MAP_APP_KEY");
        let backend_base_url = non_empty_var("BACKEND_BASE_URL");

        let map_sdk_url =
            non_empty_var("MAP_SDK_URL").unwrap_or_else(|| DEFAULT_MAP_SDK_URL.to_string());
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let request_timeout = Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 10)?);
        let sdk_script_timeout = Duration::from_secs(parse_var("SDK_SCRIPT_TIMEOUT_SECS", 15)?);
        let sdk_poll_interval = Duration::from_millis(parse_var("SDK_POLL_INTERVAL_MS", 100)?);
        let sdk_poll_max_attempts: u32 = parse_var("SDK_POLL_MAX_ATTEMPTS", 50)?;

        Ok(Self {
            map_app_key,
            backend_base_url,
            map_sdk_url,
            server_addr,
            request_timeout,
            sdk_script_timeout,
            sdk_poll_interval,
            sdk_poll_max_attempts,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match non_empty_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow!("Valor no válido para {name}: '{raw}'")),
    }
}
