//! Carga única del SDK de mapas.
//!
//! El estado de carga es global al proceso y está indexado por la URL del script.
//! Los consumidores nunca lo leen directamente: piden una `LoadSubscription`
//! a través de `ResourceLoader::acquire` y observan sus cambios.
//!
//! Flujo de `acquire`:
//!   1. Sin clave de mapa → `Failed("missing key")` sin tocar la red.
//!   2. Si ya hay una carga (en curso o terminada) para la URL → se adjunta a ella.
//!   3. Si la librería ya está inicializada en el entorno → `Ready` inmediato.
//!   4. Si existe una etiqueta de script ajena para la URL → sondeo hasta que esté lista.
//!   5. Si no, se inserta una única etiqueta, se llama a la inicialización explícita
//!      (patrón `autoload=false` + `load(callback)`) o, si no existe, se sondea.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LoadStatus {
    Pending,
    Ready,
    Failed(String),
}

impl LoadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoadStatus::Pending)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LoadError {
    #[error("missing key")]
    MissingKey,
    #[error("invalid sdk url: {0}")]
    InvalidUrl(String),
    #[error("script load failed: {0}")]
    Script(String),
    #[error("sdk initialization failed: {0}")]
    Init(String),
    #[error("sdk initialization timed out after {0} attempts")]
    InitTimeout(u32),
}

/// Entorno donde viven las etiquetas de script y la librería cargada.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// La librería está presente y completamente inicializada.
    fn library_ready(&self) -> bool;

    fn has_script_tag(&self, url: &str) -> bool;

    /// Inserta la etiqueta y resuelve cuando dispara el evento `load` (o `error`).
    async fn insert_script(&self, url: &str) -> Result<(), LoadError>;

    /// Indica si la librería expone el paso explícito de inicialización.
    fn supports_explicit_init(&self) -> bool;

    async fn initialize(&self) -> Result<(), LoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
}

/// Sondeo acotado de la disponibilidad de la librería con intervalo fijo.
pub async fn poll_until_ready(host: &dyn ScriptHost, policy: PollPolicy) -> PollOutcome {
    for _ in 0..policy.max_attempts {
        if host.library_ready() {
            return PollOutcome::Ready;
        }
        tokio::time::sleep(policy.interval).await;
    }
    if host.library_ready() {
        PollOutcome::Ready
    } else {
        PollOutcome::TimedOut
    }
}

/// Estados de carga por URL. Una vez terminal, un estado no cambia.
#[derive(Default)]
pub struct LoadRegistry {
    entries: Mutex<HashMap<String, watch::Sender<LoadStatus>>>,
}

impl LoadRegistry {
    pub fn global() -> Arc<LoadRegistry> {
        static GLOBAL: OnceLock<Arc<LoadRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(LoadRegistry::default())).clone()
    }

    /// Devuelve el canal de la URL y si se acaba de crear.
    fn entry(&self, url: &str) -> (watch::Sender<LoadStatus>, bool) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = entries.get(url) {
            return (tx.clone(), false);
        }
        let (tx, _rx) = watch::channel(LoadStatus::Pending);
        entries.insert(url.to_string(), tx.clone());
        (tx, true)
    }
}

fn settle(tx: &watch::Sender<LoadStatus>, status: LoadStatus) -> bool {
    tx.send_if_modified(move |current| {
        if current.is_terminal() {
            return false;
        }
        *current = status;
        true
    })
}

/// Construye la URL del script con `appkey` y `autoload=false`.
pub fn sdk_url(base: &str, app_key: &str) -> Result<String, LoadError> {
    let mut url = Url::parse(base).map_err(|e| LoadError::InvalidUrl(format!("{base}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("appkey", app_key)
        .append_pair("autoload", "false");
    Ok(url.to_string())
}

#[derive(Clone)]
pub struct ResourceLoader {
    host: Arc<dyn ScriptHost>,
    registry: Arc<LoadRegistry>,
    policy: PollPolicy,
}

impl ResourceLoader {
    /// Loader sobre el registro global del proceso.
    pub fn new(host: Arc<dyn ScriptHost>, policy: PollPolicy) -> Self {
        Self::with_registry(host, LoadRegistry::global(), policy)
    }

    pub fn with_registry(
        host: Arc<dyn ScriptHost>,
        registry: Arc<LoadRegistry>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            host,
            registry,
            policy,
        }
    }

    /// Pide el SDK. Nunca bloquea: el resultado se observa en la suscripción.
    pub fn acquire(&self, base_url: &str, app_key: Option<&str>) -> LoadSubscription {
        let key = app_key.map(str::trim).filter(|k| !k.is_empty());
        let Some(key) = key else {
            let (tx, _) = self.registry.entry(base_url);
            if settle(&tx, LoadStatus::Failed(LoadError::MissingKey.to_string())) {
                warn!("Falta la clave del mapa; no se intentará cargar {base_url}");
            }
            return LoadSubscription::new(base_url.to_string(), tx.subscribe());
        };

        let url = match sdk_url(base_url, key) {
            Ok(url) => url,
            Err(err) => {
                let (tx, _) = self.registry.entry(base_url);
                settle(&tx, LoadStatus::Failed(err.to_string()));
                return LoadSubscription::new(base_url.to_string(), tx.subscribe());
            }
        };

        let (tx, created) = self.registry.entry(&url);
        if created {
            self.start(&url, tx.clone());
        } else {
            debug!("Carga del SDK ya registrada; adjuntando suscriptor");
        }
        LoadSubscription::new(url, tx.subscribe())
    }

    fn start(&self, url: &str, tx: watch::Sender<LoadStatus>) {
        if self.host.library_ready() {
            info!("SDK de mapas ya inicializado en el entorno");
            settle(&tx, LoadStatus::Ready);
            return;
        }

        let host = self.host.clone();
        let policy = self.policy;
        let url = url.to_string();
        let foreign_tag = host.has_script_tag(&url);

        tokio::spawn(async move {
            let outcome = if foreign_tag {
                debug!("Etiqueta de script existente; esperando inicialización");
                wait_for_init(host.as_ref(), policy).await
            } else {
                load_script(host.as_ref(), &url, policy).await
            };

            let status = match outcome {
                Ok(()) => {
                    info!("SDK de mapas listo");
                    LoadStatus::Ready
                }
                Err(err) => {
                    warn!("Error cargando el SDK de mapas: {err}");
                    LoadStatus::Failed(err.to_string())
                }
            };
            settle(&tx, status);
        });
    }
}

async fn load_script(host: &dyn ScriptHost, url: &str, policy: PollPolicy) -> Result<(), LoadError> {
    host.insert_script(url).await?;
    if host.supports_explicit_init() {
        return host.initialize().await;
    }
    wait_for_init(host, policy).await
}

async fn wait_for_init(host: &dyn ScriptHost, policy: PollPolicy) -> Result<(), LoadError> {
    match poll_until_ready(host, policy).await {
        PollOutcome::Ready => Ok(()),
        PollOutcome::TimedOut => Err(LoadError::InitTimeout(policy.max_attempts)),
    }
}

/// Vista de un consumidor sobre una carga compartida.
///
/// Al hacer `teardown` (o soltarla) deja de entregar cambios a sus callbacks,
/// aunque la carga subyacente siga y termine después.
pub struct LoadSubscription {
    url: String,
    rx: watch::Receiver<LoadStatus>,
    alive: Arc<AtomicBool>,
}

impl LoadSubscription {
    fn new(url: String, rx: watch::Receiver<LoadStatus>) -> Self {
        Self {
            url,
            rx,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> LoadStatus {
        self.rx.borrow().clone()
    }

    /// Espera a un estado terminal.
    pub async fn settled(&self) -> LoadStatus {
        let mut rx = self.rx.clone();
        loop {
            let status = rx.borrow_and_update().clone();
            if status.is_terminal() || rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Entrega el estado actual y cada cambio posterior mientras siga viva.
    pub fn on_change<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(&LoadStatus) + Send + 'static,
    {
        let mut rx = self.rx.clone();
        let alive = self.alive.clone();
        tokio::spawn(async move {
            loop {
                let status = rx.borrow_and_update().clone();
                if !alive.load(Ordering::SeqCst) {
                    break;
                }
                callback(&status);
                if status.is_terminal() || rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    pub fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for LoadSubscription {
    fn drop(&mut self) {
        self.teardown();
    }
}
