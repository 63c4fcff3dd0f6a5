#![allow(dead_code)]

use magyar_proto::catalog::Catalog;
use magyar_proto::favorites::{FavoritesStore, DEFAULT_FAVORITES_KEY};
use magyar_proto::playback::{LoadTicket, MediaDevice, PlaybackController};
use magyar_proto::state::RadioCore;
use magyar_proto::store::KeyValueStore;

/// Device that remembers the last load so a test can answer for it.
#[derive(Debug, Default)]
pub struct ScriptedDevice {
    pub loads: Vec<(String, LoadTicket)>,
    pub paused: bool,
    pub position: Option<f64>,
    pub volume: Option<f32>,
}

impl ScriptedDevice {
    pub fn last_ticket(&self) -> LoadTicket {
        self.loads.last().map(|(_, t)| *t).expect("no load issued")
    }
}

impl MediaDevice for ScriptedDevice {
    fn load(&mut self, url: &str, ticket: LoadTicket) {
        self.loads.push((url.to_string(), ticket));
        self.position = Some(0.0);
    }
    fn play(&mut self) {
        self.paused = false;
    }
    fn pause(&mut self) {
        self.paused = true;
    }
    fn seek(&mut self, secs: f64) {
        self.position = Some(secs);
    }
    fn set_volume(&mut self, volume: f32) {
        self.volume = Some(volume);
    }
}

pub fn radio<S: KeyValueStore>(store: S) -> RadioCore<ScriptedDevice, S> {
    let favorites = FavoritesStore::load(store, DEFAULT_FAVORITES_KEY);
    let playback = PlaybackController::new(ScriptedDevice::default(), 0.7);
    RadioCore::new(Catalog::builtin(), favorites, playback)
}
