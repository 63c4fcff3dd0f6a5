use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::favorites::FavoritesStore;
use crate::filter::{visible_stations, FilterCriteria, GenreFilter};
use crate::playback::{DeviceEvent, MediaDevice, PlaybackController};
use crate::protocol::{Command, RadioSnapshot, StationId};
use crate::store::KeyValueStore;

/// All mutable radio state behind one owner: filter criteria, favorites and
/// the playback controller, over an immutable catalog.
///
/// User intents go through `apply`, device reports through `on_device_event`.
/// Both return whether anything observable changed; `rev` only moves when it
/// did, so observers can compare revisions instead of diffing snapshots.
pub struct RadioCore<D: MediaDevice, S: KeyValueStore> {
    catalog: Catalog,
    criteria: FilterCriteria,
    favorites: FavoritesStore<S>,
    playback: PlaybackController<D>,
    /// Revision from filter / favorites changes; playback keeps its own.
    local_rev: u64,
}

impl<D: MediaDevice, S: KeyValueStore> RadioCore<D, S> {
    pub fn new(
        catalog: Catalog,
        favorites: FavoritesStore<S>,
        playback: PlaybackController<D>,
    ) -> Self {
        let orphans = favorites.orphans(&catalog);
        if !orphans.is_empty() {
            debug!("Favorites not in catalog (kept): {:?}", orphans);
        }
        Self {
            catalog,
            criteria: FilterCriteria::default(),
            favorites,
            playback,
            local_rev: 0,
        }
    }

    pub fn rev(&self) -> u64 {
        self.local_rev + self.playback.rev()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    pub fn favorites(&self) -> &FavoritesStore<S> {
        &self.favorites
    }

    pub fn playback(&self) -> &PlaybackController<D> {
        &self.playback
    }

    pub fn apply(&mut self, cmd: Command) -> bool {
        let before = self.rev();
        match cmd {
            Command::Play { station_id } => self.select_station(station_id),
            Command::Stop => self.playback.stop(),
            Command::Volume { value } => {
                self.playback.set_volume(value);
            }
            Command::ToggleFavorite { station_id } => self.toggle_favorite(station_id),
            Command::SetSearch { text } => self.set_search_text(text),
            Command::SetGenre { genre } => self.set_genre(genre),
            Command::GetState => {}
        }
        self.rev() != before
    }

    pub fn on_device_event(&mut self, event: DeviceEvent) -> bool {
        self.playback.on_device_event(event)
    }

    fn select_station(&mut self, id: StationId) {
        match self.catalog.get(id) {
            Some(station) => self.playback.select_station(station),
            None => warn!("Play: unknown station {}", id),
        }
    }

    fn toggle_favorite(&mut self, id: StationId) {
        // Orphans may still be un-favorited; only unknown additions are refused.
        if !self.catalog.contains(id) && !self.favorites.is_favorite(id) {
            warn!("ToggleFavorite: unknown station {}", id);
            return;
        }
        let now = self.favorites.toggle(id);
        info!("Station {} favorite={}", id, now);
        self.local_rev += 1;
    }

    fn set_search_text(&mut self, text: String) {
        if self.criteria.search_text != text {
            debug!("Search text {:?}", text);
            self.criteria.search_text = text;
            self.local_rev += 1;
        }
    }

    fn set_genre(&mut self, genre: GenreFilter) {
        if let GenreFilter::Genre(g) = &genre {
            if !self.catalog.has_genre(g) {
                debug!("Ignoring unknown genre {:?}", g);
                return;
            }
        }
        if self.criteria.genre != genre {
            debug!("Genre filter {}", genre.label());
            self.criteria.genre = genre;
            self.local_rev += 1;
        }
    }

    pub fn visible(&self) -> Vec<StationId> {
        visible_stations(&self.catalog, &self.criteria)
            .into_iter()
            .map(|s| s.id)
            .collect()
    }

    pub fn snapshot(&self) -> RadioSnapshot {
        RadioSnapshot {
            rev: self.rev(),
            stations: self.catalog.stations().to_vec(),
            visible: self.visible(),
            genres: self.catalog.genres(),
            criteria: self.criteria.clone(),
            current_station: self.playback.current_station(),
            is_playing: self.playback.is_playing(),
            status: self.playback.status(),
            volume: self.playback.volume(),
            favorites: self.favorites.ids().to_vec(),
            last_error: self.playback.last_error().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::favorites::DEFAULT_FAVORITES_KEY;
    use crate::playback::tests::RecordingDevice;
    use crate::playback::DeviceEventKind;
    use crate::protocol::PlaybackStatus;
    use crate::store::MemoryStore;

    fn core_with(favorites: &str) -> RadioCore<RecordingDevice, MemoryStore> {
        let store = MemoryStore::with_value(DEFAULT_FAVORITES_KEY, favorites);
        RadioCore::new(
            Catalog::builtin(),
            FavoritesStore::load(store, DEFAULT_FAVORITES_KEY),
            PlaybackController::new(RecordingDevice::default(), 0.7),
        )
    }

    fn play(id: u32) -> Command {
        Command::Play {
            station_id: StationId(id),
        }
    }

    #[test]
    fn test_initial_snapshot() {
        let core = core_with("[]");
        let snap = core.snapshot();
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert_eq!(snap.visible.len(), 10);
        assert_eq!(snap.genres.len(), 8);
        assert_eq!(snap.volume, 0.7);
        assert!(snap.favorites.is_empty());
    }

    #[test]
    fn test_play_unknown_station_is_ignored() {
        let mut core = core_with("[]");
        assert!(!core.apply(play(42)));
        assert_eq!(core.snapshot().status, PlaybackStatus::Idle);
    }

    #[test]
    fn test_rev_moves_only_on_change() {
        let mut core = core_with("[]");
        let mut rev = core.rev();

        for cmd in [
            play(1),
            Command::SetSearch { text: "jazz".into() },
            Command::ToggleFavorite {
                station_id: StationId(7),
            },
            Command::Volume { value: 0.3 },
            Command::Stop,
        ] {
            assert!(core.apply(cmd.clone()), "{cmd:?} should change state");
            assert!(core.rev() > rev);
            rev = core.rev();
        }

        for cmd in [
            Command::Stop,
            Command::GetState,
            Command::SetSearch { text: "jazz".into() },
            Command::Volume { value: 0.3 },
        ] {
            assert!(!core.apply(cmd.clone()), "{cmd:?} should be a no-op");
            assert_eq!(core.rev(), rev);
        }
    }

    #[test]
    fn test_unknown_genre_is_ignored() {
        let mut core = core_with("[]");
        core.apply(Command::SetGenre {
            genre: "Jazz".into(),
        });
        assert!(!core.apply(Command::SetGenre {
            genre: "Polka".into(),
        }));
        assert_eq!(core.criteria().genre, GenreFilter::Genre("Jazz".into()));
        assert_eq!(core.visible(), vec![StationId(7)]);

        assert!(core.apply(Command::SetGenre {
            genre: GenreFilter::All,
        }));
        assert_eq!(core.visible().len(), 10);
    }

    #[test]
    fn test_search_and_genre_drive_visible() {
        let mut core = core_with("[]");
        core.apply(Command::SetSearch {
            text: "HUNGARIAN".into(),
        });
        assert_eq!(
            core.visible(),
            vec![StationId(4), StationId(5), StationId(10)]
        );
        core.apply(Command::SetGenre {
            genre: "Folk".into(),
        });
        assert_eq!(core.visible(), vec![StationId(4)]);
    }

    #[test]
    fn test_filtering_does_not_touch_playback() {
        let mut core = core_with("[]");
        core.apply(play(3));
        core.apply(Command::SetGenre {
            genre: "Jazz".into(),
        });
        let snap = core.snapshot();
        assert_eq!(snap.current_station, Some(StationId(3)));
        assert!(snap.is_playing);
        assert!(!snap.visible.contains(&StationId(3)));
    }

    #[test]
    fn test_toggle_favorite_unknown_and_orphan() {
        let mut core = core_with("[99]");
        assert!(!core.apply(Command::ToggleFavorite {
            station_id: StationId(50),
        }));
        assert!(core.apply(Command::ToggleFavorite {
            station_id: StationId(99),
        }));
        assert!(core.snapshot().favorites.is_empty());
    }

    #[test]
    fn test_error_event_surfaces_in_snapshot() {
        let mut core = core_with("[]");
        core.apply(play(6));
        let ticket = core.playback().active_ticket().unwrap();
        assert!(core.on_device_event(DeviceEvent::new(
            ticket,
            DeviceEventKind::Errored("404".into())
        )));
        let snap = core.snapshot();
        assert_eq!(snap.status, PlaybackStatus::Paused);
        assert_eq!(snap.last_error.as_deref(), Some("404"));
        assert_eq!(snap.current_station_name(), Some("Info Rádió"));
    }
}
