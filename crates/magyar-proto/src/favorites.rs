//! Favorite stations: an insertion-ordered id set, written through to a
//! `KeyValueStore` on every toggle.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::protocol::StationId;
use crate::store::KeyValueStore;

/// Storage key used when the config does not name one.
pub const DEFAULT_FAVORITES_KEY: &str = "radioFavorites";

/// One persisted entry.  Older clients stored whole station records; only
/// the id is kept from those.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredFavorite {
    Id(StationId),
    Record { id: StationId },
}

impl StoredFavorite {
    fn id(&self) -> StationId {
        match self {
            Self::Id(id) | Self::Record { id } => *id,
        }
    }
}

/// Parse a persisted favorites value.  Returns `None` when malformed.
pub fn parse_favorites(raw: &str) -> Option<Vec<StationId>> {
    let entries: Vec<StoredFavorite> = serde_json::from_str(raw).ok()?;
    let mut ids: Vec<StationId> = Vec::with_capacity(entries.len());
    for id in entries.iter().map(StoredFavorite::id) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Some(ids)
}

pub struct FavoritesStore<S: KeyValueStore> {
    ids: Vec<StationId>,
    store: S,
    key: String,
}

impl<S: KeyValueStore> FavoritesStore<S> {
    /// Read favorites from `store`.  Absent, unreadable or malformed data all
    /// yield an empty set.
    pub fn load(store: S, key: impl Into<String>) -> Self {
        let key = key.into();
        let ids = match store.get(&key) {
            Ok(Some(raw)) => match parse_favorites(&raw) {
                Some(ids) => {
                    info!("Loaded {} favorite(s)", ids.len());
                    ids
                }
                None => {
                    warn!("Favorites value under {:?} is malformed, starting empty", key);
                    Vec::new()
                }
            },
            Ok(None) => {
                debug!("No favorites stored under {:?}", key);
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to read favorites: {}", e);
                Vec::new()
            }
        };
        Self { ids, store, key }
    }

    /// Flip membership of `id` and persist.  Returns the new membership.
    pub fn toggle(&mut self, id: StationId) -> bool {
        let now_favorite = match self.ids.iter().position(|f| *f == id) {
            Some(pos) => {
                self.ids.remove(pos);
                false
            }
            None => {
                self.ids.push(id);
                true
            }
        };
        debug!("Favorite {} → {}", id, now_favorite);
        self.persist();
        now_favorite
    }

    pub fn is_favorite(&self, id: StationId) -> bool {
        self.ids.contains(&id)
    }

    /// Write the full set.  Failures are logged; the in-memory set stays
    /// authoritative and the next successful write re-syncs storage.
    pub fn persist(&mut self) {
        let json = match serde_json::to_string(&self.ids) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize favorites: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &json) {
            warn!("Failed to persist favorites: {}", e);
        }
    }

    pub fn ids(&self) -> &[StationId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Favorites whose station is not in `catalog`.  They are kept, not pruned.
    pub fn orphans(&self, catalog: &Catalog) -> Vec<StationId> {
        self.ids
            .iter()
            .copied()
            .filter(|id| !catalog.contains(*id))
            .collect()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore, StoreError};

    const KEY: &str = DEFAULT_FAVORITES_KEY;

    /// Accepts reads, refuses every write.
    struct ReadOnlyStore(MemoryStore);

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key)
        }

        fn set(&mut self, key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::InvalidKey(key.to_string()))
        }
    }

    fn stored(store: &MemoryStore) -> Option<String> {
        store.get(KEY).unwrap()
    }

    #[test]
    fn test_toggle_twice_restores_set() {
        let mut favs = FavoritesStore::load(MemoryStore::with_value(KEY, "[2,5]"), KEY);
        let before = favs.ids().to_vec();

        assert!(favs.toggle(StationId(7)));
        assert!(favs.is_favorite(StationId(7)));
        assert!(!favs.toggle(StationId(7)));
        assert_eq!(favs.ids(), before.as_slice());

        assert!(!favs.toggle(StationId(2)));
        assert!(favs.toggle(StationId(2)));
        // membership restored; re-added entries go to the back
        assert_eq!(favs.ids(), &[StationId(5), StationId(2)]);
    }

    #[test]
    fn test_every_toggle_writes_through() {
        let mut favs = FavoritesStore::load(MemoryStore::new(), KEY);
        assert!(stored(favs.store()).is_none());

        favs.toggle(StationId(3));
        assert_eq!(stored(favs.store()).as_deref(), Some("[3]"));
        favs.toggle(StationId(1));
        assert_eq!(stored(favs.store()).as_deref(), Some("[3,1]"));
        favs.toggle(StationId(3));
        assert_eq!(stored(favs.store()).as_deref(), Some("[1]"));
    }

    #[test]
    fn test_malformed_value_loads_empty() {
        for raw in ["{not json", "42", r#"{"id":1}"#, r#"["a","b"]"#, ""] {
            let favs = FavoritesStore::load(MemoryStore::with_value(KEY, raw), KEY);
            assert!(favs.is_empty(), "expected empty set for {raw:?}");
        }
    }

    #[test]
    fn test_legacy_station_records_load() {
        let raw = r#"[
            {"id": 3, "name": "Bartók Rádió", "genre": "Classical"},
            {"id": 7, "name": "Jazzy Rádió", "url": "https://radio.musorok.org/listen/jazzy/jazzy.mp3"},
            3
        ]"#;
        let favs = FavoritesStore::load(MemoryStore::with_value(KEY, raw), KEY);
        assert_eq!(favs.ids(), &[StationId(3), StationId(7)]);
    }

    #[test]
    fn test_orphans_are_kept() {
        let catalog = Catalog::builtin();
        let mut favs = FavoritesStore::load(MemoryStore::with_value(KEY, "[1,99]"), KEY);
        assert_eq!(favs.orphans(&catalog), vec![StationId(99)]);
        assert!(favs.is_favorite(StationId(99)));

        favs.toggle(StationId(2));
        assert_eq!(stored(favs.store()).as_deref(), Some("[1,99,2]"));
    }

    #[test]
    fn test_persist_failure_keeps_memory_state() {
        let store = ReadOnlyStore(MemoryStore::with_value(KEY, "[1]"));
        let mut favs = FavoritesStore::load(store, KEY);
        assert!(favs.toggle(StationId(4)));
        assert_eq!(favs.ids(), &[StationId(1), StationId(4)]);
        assert_eq!(favs.store().0.get(KEY).unwrap().as_deref(), Some("[1]"));
    }

    #[test]
    fn test_file_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut favs = FavoritesStore::load(FileStore::new(dir.path()), KEY);
            favs.toggle(StationId(6));
            favs.toggle(StationId(9));
        }
        let favs = FavoritesStore::load(FileStore::new(dir.path()), KEY);
        assert_eq!(favs.ids(), &[StationId(6), StationId(9)]);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("radioFavorites.json"), b"\xff\xfe garbage").unwrap();
        let favs = FavoritesStore::load(FileStore::new(dir.path()), KEY);
        assert!(favs.is_empty());
    }
}
