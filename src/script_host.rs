//! Entorno de scripts del proceso: descarga el SDK por HTTP y emula el
//! ciclo `autoload=false` + `kakao.maps.load(callback)`.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::loader::{LoadError, ScriptHost};

#[derive(Default)]
struct ScriptEnv {
    tags: HashSet<String>,
    loaded: bool,
    initialized: bool,
}

pub struct HttpScriptHost {
    http: reqwest::Client,
    env: Mutex<ScriptEnv>,
}

impl HttpScriptHost {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            env: Mutex::new(ScriptEnv::default()),
        })
    }

    fn env(&self) -> std::sync::MutexGuard<'_, ScriptEnv> {
        self.env.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ScriptHost for HttpScriptHost {
    fn library_ready(&self) -> bool {
        self.env().initialized
    }

    fn has_script_tag(&self, url: &str) -> bool {
        self.env().tags.contains(url)
    }

    async fn insert_script(&self, url: &str) -> Result<(), LoadError> {
        self.env().tags.insert(url.to_string());
        debug!("Descargando script del SDK: {url}");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::Script(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Script(format!("HTTP {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| LoadError::Script(e.to_string()))?;
        if body.trim().is_empty() {
            return Err(LoadError::Script("script vacío".into()));
        }

        self.env().loaded = true;
        info!("Script del SDK cargado ({} bytes)", body.len());
        Ok(())
    }

    fn supports_explicit_init(&self) -> bool {
        self.env().loaded
    }

    async fn initialize(&self) -> Result<(), LoadError> {
        let mut env = self.env();
        if !env.loaded {
            return Err(LoadError::Init("el script no se ha cargado".into()));
        }
        env.initialized = true;
        Ok(())
    }
}
