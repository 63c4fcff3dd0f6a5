//! Station catalog, filtering, favorites and the playback state machine
//! shared by the daemon and its clients.

pub mod catalog;
pub mod config;
pub mod favorites;
pub mod filter;
pub mod platform;
pub mod playback;
pub mod protocol;
pub mod state;
pub mod store;

pub use catalog::Catalog;
pub use favorites::FavoritesStore;
pub use filter::{visible_stations, FilterCriteria, GenreFilter};
pub use playback::{DeviceEvent, DeviceEventKind, LoadTicket, MediaDevice, PlaybackController};
pub use protocol::{Command, PlaybackStatus, RadioSnapshot, Station, StationId};
pub use state::RadioCore;
pub use store::{FileStore, KeyValueStore, MemoryStore};
