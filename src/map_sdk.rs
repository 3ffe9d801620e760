//! Frontera con el SDK de mapas: mapas, marcadores y listeners de clic.
//!
//! `HeadlessMapSdk` mantiene las superficies en memoria; el shell HTTP le
//! reenvía los clics del usuario con `click_container`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::models::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MapHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MarkerHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapOptions {
    pub center: Coordinate,
    pub level: u8,
}

pub type ClickHandler = Arc<dyn Fn(Coordinate) + Send + Sync>;

pub trait MapSdk: Send + Sync {
    fn create_map(&self, container: &str, options: MapOptions) -> Result<MapHandle>;
    fn create_marker(&self, map: MapHandle, position: Coordinate) -> Result<MarkerHandle>;
    fn set_marker_position(&self, marker: MarkerHandle, position: Coordinate) -> Result<()>;
    fn add_click_listener(&self, map: MapHandle, handler: ClickHandler) -> Result<ListenerHandle>;
    fn remove_listener(&self, listener: ListenerHandle);
}

#[derive(Debug, Clone, Serialize)]
pub struct MapSurface {
    pub container: String,
    pub options: MapOptions,
}

#[derive(Default)]
struct Surfaces {
    next_id: u64,
    maps: HashMap<MapHandle, MapSurface>,
    markers: HashMap<MarkerHandle, (MapHandle, Coordinate)>,
    listeners: HashMap<ListenerHandle, (MapHandle, ClickHandler)>,
}

impl Surfaces {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct HeadlessMapSdk {
    inner: Mutex<Surfaces>,
}

impl HeadlessMapSdk {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Surfaces> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simula un clic del usuario sobre el mapa montado en `container`.
    /// Devuelve cuántos listeners lo recibieron.
    pub fn click_container(&self, container: &str, at: Coordinate) -> Result<usize> {
        let handlers: Vec<ClickHandler> = {
            let surfaces = self.lock();
            let map = surfaces
                .maps
                .iter()
                .find(|(_, s)| s.container == container)
                .map(|(h, _)| *h)
                .ok_or_else(|| anyhow!("No hay ningún mapa montado en '{container}'"))?;
            surfaces
                .listeners
                .values()
                .filter(|(m, _)| *m == map)
                .map(|(_, h)| h.clone())
                .collect()
        };
        // Los handlers mueven marcadores: se llaman sin el lock tomado.
        for handler in &handlers {
            handler(at);
        }
        Ok(handlers.len())
    }

    #[cfg(test)]
    pub fn map_count(&self, container: &str) -> usize {
        self.lock()
            .maps
            .values()
            .filter(|s| s.container == container)
            .count()
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    #[cfg(test)]
    pub fn surface(&self, map: MapHandle) -> Option<MapSurface> {
        self.lock().maps.get(&map).cloned()
    }

    #[cfg(test)]
    pub fn markers_on(&self, map: MapHandle) -> usize {
        self.lock().markers.values().filter(|(m, _)| *m == map).count()
    }
}

impl MapSdk for HeadlessMapSdk {
    fn create_map(&self, container: &str, options: MapOptions) -> Result<MapHandle> {
        let mut surfaces = self.lock();
        let handle = MapHandle(surfaces.next());
        surfaces.maps.insert(
            handle,
            MapSurface {
                container: container.to_string(),
                options,
            },
        );
        Ok(handle)
    }

    fn create_marker(&self, map: MapHandle, position: Coordinate) -> Result<MarkerHandle> {
        let mut surfaces = self.lock();
        if !surfaces.maps.contains_key(&map) {
            return Err(anyhow!("Mapa desconocido: {map:?}"));
        }
        let handle = MarkerHandle(surfaces.next());
        surfaces.markers.insert(handle, (map, position));
        Ok(handle)
    }

    fn set_marker_position(&self, marker: MarkerHandle, position: Coordinate) -> Result<()> {
        let mut surfaces = self.lock();
        let entry = surfaces
            .markers
            .get_mut(&marker)
            .ok_or_else(|| anyhow!("Marcador desconocido: {marker:?}"))?;
        entry.1 = position;
        Ok(())
    }

    fn add_click_listener(&self, map: MapHandle, handler: ClickHandler) -> Result<ListenerHandle> {
        let mut surfaces = self.lock();
        if !surfaces.maps.contains_key(&map) {
            return Err(anyhow!("Mapa desconocido: {map:?}"));
        }
        let handle = ListenerHandle(surfaces.next());
        surfaces.listeners.insert(handle, (map, handler));
        Ok(handle)
    }

    fn remove_listener(&self, listener: ListenerHandle) {
        self.lock().listeners.remove(&listener);
    }
}
