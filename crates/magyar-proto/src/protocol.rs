use serde::{Deserialize, Serialize};

use crate::filter::{FilterCriteria, GenreFilter};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame body, in bytes.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Stable station identifier.  Serialized as a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub u32);

impl std::fmt::Display for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub url: String,
    /// Short description / blurb
    #[serde(default)]
    pub description: String,
    /// Controlled vocabulary, compared case-sensitively by the genre filter
    #[serde(default)]
    pub genre: String,
    /// City the station broadcasts from
    #[serde(default)]
    pub location: String,
}

/// User intents, sent from a client to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Click on a station: play it, or pause it when it is already playing.
    Play { station_id: StationId },
    Stop,
    Volume { value: f32 },
    ToggleFavorite { station_id: StationId },
    SetSearch { text: String },
    SetGenre { genre: GenreFilter },
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: RadioSnapshot,
    },
    State {
        data: RadioSnapshot,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Coarse playback status derived from the controller state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // no current station
    Paused,  // station selected, not playing
    Playing, // station selected, device reports audio
}

/// Everything a presentation layer needs to render.  `rev` is a monotonically
/// increasing counter bumped on every state change; clients use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RadioSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub stations: Vec<Station>,
    /// Ids passing the current filter, in catalog order.
    pub visible: Vec<StationId>,
    /// Distinct genres in catalog order (without the "All" sentinel).
    pub genres: Vec<String>,
    pub criteria: FilterCriteria,
    pub current_station: Option<StationId>,
    pub is_playing: bool,
    pub status: PlaybackStatus,
    pub volume: f32,
    /// Favorite ids in insertion order.  May contain ids missing from `stations`.
    pub favorites: Vec<StationId>,
    /// Last playback diagnostic from the media device, if any.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl RadioSnapshot {
    pub fn station(&self, id: StationId) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn current_station_name(&self) -> Option<&str> {
        self.current_station
            .and_then(|id| self.station(id))
            .map(|s| s.name.as_str())
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN);
        }
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
