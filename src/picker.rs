//! Selector de coordenadas: un mapa, un marcador y un único listener de clic
//! por contenedor. Cada clic mueve el marcador y emite la coordenada.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    loader::LoadStatus,
    map_sdk::{ClickHandler, ListenerHandle, MapHandle, MapOptions, MapSdk},
    models::Coordinate,
};

/// Ayuntamiento de Seúl.
pub const DEFAULT_CENTER: Coordinate = Coordinate {
    lat: 37.5665,
    lng: 126.9780,
};
pub const DEFAULT_LEVEL: u8 = 3;

pub type PickCallback = Arc<dyn Fn(Coordinate) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MapView {
    Loading,
    Ready { center: Coordinate, marker: Coordinate },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Copy)]
struct Mounted {
    map: MapHandle,
    listener: ListenerHandle,
}

enum PickerState {
    Waiting,
    Mounted(Mounted),
    Placeholder(String),
    TornDown,
}

pub struct CoordinatePicker {
    sdk: Arc<dyn MapSdk>,
    container: String,
    on_pick: PickCallback,
    state: Mutex<PickerState>,
    marker_at: Arc<Mutex<Coordinate>>,
    alive: Arc<AtomicBool>,
}

impl CoordinatePicker {
    pub fn new(sdk: Arc<dyn MapSdk>, container: impl Into<String>, on_pick: PickCallback) -> Self {
        Self {
            sdk,
            container: container.into(),
            on_pick,
            state: Mutex::new(PickerState::Waiting),
            marker_at: Arc::new(Mutex::new(DEFAULT_CENTER)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn state(&self) -> MutexGuard<'_, PickerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reacciona a los cambios de estado del loader.
    pub fn handle_status(&self, status: &LoadStatus) -> Result<()> {
        match status {
            LoadStatus::Pending => Ok(()),
            LoadStatus::Ready => self.mount(),
            LoadStatus::Failed(reason) => {
                let mut state = self.state();
                if matches!(*state, PickerState::Waiting) {
                    warn!("Mapa no disponible en '{}': {reason}", self.container);
                    *state = PickerState::Placeholder(reason.clone());
                }
                Ok(())
            }
        }
    }

    /// Monta mapa, marcador y listener. Sólo se llega aquí con el SDK en `Ready`;
    /// repetir la llamada no crea nada nuevo.
    fn mount(&self) -> Result<()> {
        let mut state = self.state();
        match *state {
            PickerState::Mounted(_) => {
                debug!("Mapa ya montado en '{}'", self.container);
                return Ok(());
            }
            PickerState::TornDown => return Ok(()),
            PickerState::Waiting | PickerState::Placeholder(_) => {}
        }

        let map = self.sdk.create_map(
            &self.container,
            MapOptions {
                center: DEFAULT_CENTER,
                level: DEFAULT_LEVEL,
            },
        )?;
        let marker = self.sdk.create_marker(map, DEFAULT_CENTER)?;

        let handler: ClickHandler = {
            let sdk = self.sdk.clone();
            let alive = self.alive.clone();
            let on_pick = self.on_pick.clone();
            let marker_at = self.marker_at.clone();
            Arc::new(move |at: Coordinate| {
                if !alive.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(err) = sdk.set_marker_position(marker, at) {
                    warn!("No se pudo mover el marcador: {err}");
                    return;
                }
                *marker_at.lock().unwrap_or_else(|e| e.into_inner()) = at;
                on_pick(at);
            })
        };
        let listener = self.sdk.add_click_listener(map, handler)?;

        *state = PickerState::Mounted(Mounted { map, listener });
        info!("Mapa montado en '{}'", self.container);
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        matches!(*self.state(), PickerState::Mounted(_))
    }

    #[cfg(test)]
    pub fn map_handle(&self) -> Option<MapHandle> {
        match *self.state() {
            PickerState::Mounted(m) => Some(m.map),
            _ => None,
        }
    }

    pub fn view(&self) -> MapView {
        match &*self.state() {
            PickerState::Mounted(_) => MapView::Ready {
                center: DEFAULT_CENTER,
                marker: *self.marker_at.lock().unwrap_or_else(|e| e.into_inner()),
            },
            PickerState::Placeholder(reason) => MapView::Unavailable {
                reason: reason.clone(),
            },
            PickerState::Waiting | PickerState::TornDown => MapView::Loading,
        }
    }

    /// Libera el listener; los clics que lleguen después se ignoran.
    pub fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.state(), PickerState::TornDown);
        if let PickerState::Mounted(m) = previous {
            self.sdk.remove_listener(m.listener);
            debug!("Listener de clic liberado en '{}' ({:?})", self.container, m.map);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_sdk::{HeadlessMapSdk, MarkerHandle};

    fn recording_picker(sdk: Arc<dyn MapSdk>) -> (CoordinatePicker, Arc<Mutex<Vec<Coordinate>>>) {
        let picks = Arc::new(Mutex::new(Vec::new()));
        let sink = picks.clone();
        let picker = CoordinatePicker::new(
            sdk,
            "map",
            Arc::new(move |c| sink.lock().unwrap().push(c)),
        );
        (picker, picks)
    }

    #[test]
    fn each_click_emits_once_and_moves_marker() {
        let sdk = Arc::new(HeadlessMapSdk::new());
        let (picker, picks) = recording_picker(sdk.clone());
        picker.handle_status(&LoadStatus::Ready).unwrap();

        let clicks: Vec<Coordinate> = (0..5)
            .map(|i| Coordinate::new(37.5 + i as f64 * 0.01, 127.0).unwrap())
            .collect();
        for c in &clicks {
            sdk.click_container("map", *c).unwrap();
        }

        assert_eq!(*picks.lock().unwrap(), clicks);
        assert_eq!(
            picker.view(),
            MapView::Ready {
                center: DEFAULT_CENTER,
                marker: clicks[4],
            }
        );
    }

    #[test]
    fn ready_twice_does_not_duplicate_map_or_listener() {
        let sdk = Arc::new(HeadlessMapSdk::new());
        let (picker, picks) = recording_picker(sdk.clone());
        picker.handle_status(&LoadStatus::Ready).unwrap();
        picker.handle_status(&LoadStatus::Ready).unwrap();

        assert_eq!(sdk.map_count("map"), 1);
        assert_eq!(sdk.listener_count(), 1);
        let map = picker.map_handle().unwrap();
        assert_eq!(sdk.markers_on(map), 1);
        assert_eq!(sdk.surface(map).unwrap().options.center, DEFAULT_CENTER);

        sdk.click_container("map", DEFAULT_CENTER).unwrap();
        assert_eq!(picks.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_load_never_creates_a_map() {
        let sdk = Arc::new(HeadlessMapSdk::new());
        let (picker, _) = recording_picker(sdk.clone());
        picker
            .handle_status(&LoadStatus::Failed("missing key".into()))
            .unwrap();

        assert_eq!(sdk.map_count("map"), 0);
        assert_eq!(
            picker.view(),
            MapView::Unavailable {
                reason: "missing key".into()
            }
        );
    }

    #[test]
    fn pending_keeps_loading_view() {
        let sdk = Arc::new(HeadlessMapSdk::new());
        let (picker, _) = recording_picker(sdk.clone());
        picker.handle_status(&LoadStatus::Pending).unwrap();
        assert_eq!(picker.view(), MapView::Loading);
        assert!(!picker.is_mounted());
    }

    #[test]
    fn teardown_releases_listener() {
        let sdk = Arc::new(HeadlessMapSdk::new());
        let (picker, picks) = recording_picker(sdk.clone());
        picker.handle_status(&LoadStatus::Ready).unwrap();
        picker.teardown();

        assert_eq!(sdk.listener_count(), 0);
        assert_eq!(sdk.click_container("map", DEFAULT_CENTER).unwrap(), 0);
        picker.handle_status(&LoadStatus::Ready).unwrap();
        assert_eq!(sdk.map_count("map"), 1);
        assert!(picks.lock().unwrap().is_empty());
    }

    /// SDK que nunca suelta listeners, para forzar clics tardíos.
    struct LeakySdk(HeadlessMapSdk);

    impl MapSdk for LeakySdk {
        fn create_map(&self, container: &str, options: MapOptions) -> Result<MapHandle> {
            self.0.create_map(container, options)
        }
        fn create_marker(&self, map: MapHandle, position: Coordinate) -> Result<MarkerHandle> {
            self.0.create_marker(map, position)
        }
        fn set_marker_position(&self, marker: MarkerHandle, position: Coordinate) -> Result<()> {
            self.0.set_marker_position(marker, position)
        }
        fn add_click_listener(&self, map: MapHandle, handler: ClickHandler) -> Result<ListenerHandle> {
            self.0.add_click_listener(map, handler)
        }
        fn remove_listener(&self, _listener: ListenerHandle) {}
    }

    #[test]
    fn late_click_after_teardown_is_ignored() {
        let sdk = Arc::new(LeakySdk(HeadlessMapSdk::new()));
        let (picker, picks) = recording_picker(sdk.clone());
        picker.handle_status(&LoadStatus::Ready).unwrap();
        let map = picker.map_handle().unwrap();
        picker.teardown();

        let late = Coordinate::new(35.1, 129.0).unwrap();
        assert_eq!(sdk.0.click_container("map", late).unwrap(), 1);
        assert!(picks.lock().unwrap().is_empty());
        assert_eq!(sdk.0.markers_on(map), 1);
    }
}
