//! The station catalog: an immutable, ordered list of stations with unique ids.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::protocol::{Station, StationId};

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("station catalog is empty")]
    Empty,
    #[error("duplicate station id {0}")]
    DuplicateId(StationId),
}

#[derive(Debug, Clone)]
pub struct Catalog {
    stations: Vec<Station>,
}

impl Catalog {
    pub fn new(stations: Vec<Station>) -> Result<Self, CatalogError> {
        if stations.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = HashSet::with_capacity(stations.len());
        for station in &stations {
            if !seen.insert(station.id) {
                return Err(CatalogError::DuplicateId(station.id));
            }
        }
        Ok(Self { stations })
    }

    /// The stations shipped with the player.
    pub fn builtin() -> Self {
        let stations = BUILTIN_STATIONS
            .iter()
            .map(|&(id, name, description, url, genre, location)| Station {
                id: StationId(id),
                name: name.to_string(),
                description: description.to_string(),
                url: url.to_string(),
                genre: genre.to_string(),
                location: location.to_string(),
            })
            .collect();
        Self { stations }
    }

    pub fn get(&self, id: StationId) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: StationId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Station> {
        self.stations.iter()
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    /// True only for a catalog with no stations.
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Distinct genres in order of first appearance.
    pub fn genres(&self) -> Vec<String> {
        let mut genres: Vec<String> = Vec::new();
        for station in &self.stations {
            if !genres.iter().any(|g| *g == station.genre) {
                genres.push(station.genre.clone());
            }
        }
        genres
    }

    pub fn has_genre(&self, genre: &str) -> bool {
        self.stations.iter().any(|s| s.genre == genre)
    }
}

const BUILTIN_STATIONS: &[(u32, &str, &str, &str, &str, &str)] = &[
    (
        1,
        "Kossuth Rádió",
        "Public news and current affairs radio",
        "https://mr-stream.connectmedia.hu/4741/mr1.mp3",
        "News",
        "Budapest",
    ),
    (
        2,
        "Petőfi Rádió",
        "Music radio for younger audience",
        "https://mr-stream.connectmedia.hu/4742/mr2.mp3",
        "Music",
        "Budapest",
    ),
    (
        3,
        "Bartók Rádió",
        "Classical and cultural programming",
        "https://mr-stream.connectmedia.hu/4743/mr3.mp3",
        "Classical",
        "Budapest",
    ),
    (
        4,
        "Dankó Rádió",
        "Traditional Hungarian folk music",
        "https://mr-stream.connectmedia.hu/4744/mr4.mp3",
        "Folk",
        "Budapest",
    ),
    (
        5,
        "Duna World Rádió",
        "Hungarian programming for diaspora",
        "https://mr-stream.connectmedia.hu/4761/dwr.mp3",
        "World",
        "Budapest",
    ),
    (
        6,
        "Info Rádió",
        "News and information radio",
        "https://stream.infostart.hu/lejatszo/stream",
        "News",
        "Budapest",
    ),
    (
        7,
        "Jazzy Rádió",
        "Jazz and smooth music",
        "https://radio.musorok.org/listen/jazzy/jazzy.mp3",
        "Jazz",
        "Budapest",
    ),
    (
        8,
        "Klasszik Rádió 92.1",
        "Classical music radio",
        "https://s04.diazol.hu:9600/live.mp3",
        "Classical",
        "Budapest",
    ),
    (
        9,
        "Klubrádió 95.3 FM",
        "Talk and news radio",
        "https://hu-stream05.klubradio.hu:8443/bpstream",
        "Talk",
        "Budapest",
    ),
    (
        10,
        "Lánchíd Rádió",
        "Hungarian pop and rock music",
        "http://stream001.radio.hu:8080/mr6m.mp3",
        "Pop/Rock",
        "Budapest",
    ),
];

// ── TOML station loader ───────────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[station]]` table.
/// Kept separate from `Station` so the file schema can diverge from the wire
/// struct without breaking either.
#[derive(Debug, serde::Deserialize)]
struct TomlStationFile {
    station: Vec<TomlStation>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlStation {
    id: u32,
    name: String,
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    genre: String,
    #[serde(default)]
    location: String,
}

pub fn load_stations_from_toml(path: &Path) -> anyhow::Result<Catalog> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Catalog> {
    let file: TomlStationFile = toml::from_str(content)?;
    let stations = file
        .station
        .into_iter()
        .map(|s| Station {
            id: StationId(s.id),
            name: s.name,
            url: s.url,
            description: s.description,
            genre: s.genre,
            location: s.location,
        })
        .collect();
    Ok(Catalog::new(stations)?)
}

/// The catalog from `path` when it exists and is valid, else the built-in one.
pub fn load_or_builtin(path: &Path) -> Catalog {
    if !path.exists() {
        return Catalog::builtin();
    }
    match load_stations_from_toml(path) {
        Ok(catalog) => {
            info!("Loaded {} stations from {:?}", catalog.len(), path);
            catalog
        }
        Err(e) => {
            warn!("Ignoring station file {:?}: {}", path, e);
            Catalog::builtin()
        }
    }
}
