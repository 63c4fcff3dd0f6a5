//! Playback controller — owns "current station", play/pause and volume, and is
//! the only code that talks to the media device.
//!
//! The device is asynchronous: commands are fire-and-forget and the device
//! reports status changes later as `DeviceEvent`s.  Device events are the
//! source of truth for `is_playing`; `current_station` and `volume` are owned
//! here and only ever pushed to the device.
//!
//! # States
//! ```text
//!  Idle     — no current station
//!  Paused   — current station set, not playing
//!  Playing  — current station set, device playing (or load in flight)
//! ```
//!
//! Every `load` carries a `LoadTicket`.  The device tags its events with the
//! ticket of the load they belong to; events for any other ticket are stale and
//! dropped, so a slow "started" for a previous station can never flip
//! `is_playing` for the current one.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::protocol::{PlaybackStatus, Station, StationId};

/// Identifies one `load` command.  `seq` increases on every load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTicket {
    pub seq: u64,
    pub station: StationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEventKind {
    Started,
    Paused,
    Ended,
    Errored(String),
}

/// Status change reported by the media device for the load `ticket`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub ticket: LoadTicket,
    pub kind: DeviceEventKind,
}

impl DeviceEvent {
    pub fn new(ticket: LoadTicket, kind: DeviceEventKind) -> Self {
        Self { ticket, kind }
    }
}

/// The platform media-playback capability.  All calls return immediately;
/// outcomes arrive later as `DeviceEvent`s.
pub trait MediaDevice {
    /// Replace the current source with `url` and remember `ticket` for the
    /// events that follow.
    fn load(&mut self, url: &str, ticket: LoadTicket);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, secs: f64);
    /// `volume` is in [0.0, 1.0].
    fn set_volume(&mut self, volume: f32);
}

impl<D: MediaDevice + ?Sized> MediaDevice for Box<D> {
    fn load(&mut self, url: &str, ticket: LoadTicket) {
        (**self).load(url, ticket)
    }

    fn play(&mut self) {
        (**self).play()
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn seek(&mut self, secs: f64) {
        (**self).seek(secs)
    }

    fn set_volume(&mut self, volume: f32) {
        (**self).set_volume(volume)
    }
}

pub struct PlaybackController<D: MediaDevice> {
    device: D,
    current_station: Option<StationId>,
    is_playing: bool,
    volume: f32,
    /// Ticket of the most recent load; `None` until the first selection.
    active: Option<LoadTicket>,
    next_seq: u64,
    last_error: Option<String>,
    /// Bumped on every state change.
    rev: u64,
}

impl<D: MediaDevice> PlaybackController<D> {
    /// Starts `Idle`.  The initial volume is pushed to the device right away.
    pub fn new(mut device: D, default_volume: f32) -> Self {
        let volume = if default_volume.is_nan() {
            0.0
        } else {
            default_volume.clamp(0.0, 1.0)
        };
        device.set_volume(volume);
        Self {
            device,
            current_station: None,
            is_playing: false,
            volume,
            active: None,
            next_seq: 1,
            last_error: None,
            rev: 0,
        }
    }

    pub fn current_station(&self) -> Option<StationId> {
        self.current_station
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn active_ticket(&self) -> Option<LoadTicket> {
        self.active
    }

    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn status(&self) -> PlaybackStatus {
        match (self.current_station, self.is_playing) {
            (None, _) => PlaybackStatus::Idle,
            (Some(_), true) => PlaybackStatus::Playing,
            (Some(_), false) => PlaybackStatus::Paused,
        }
    }

    /// Click on a station.  Pauses in place when `station` is already playing,
    /// otherwise loads it and starts playback.
    pub fn select_station(&mut self, station: &Station) {
        if self.current_station == Some(station.id) && self.is_playing {
            info!("Pausing '{}'", station.name);
            self.device.pause();
            self.is_playing = false;
            self.rev += 1;
            return;
        }

        let ticket = LoadTicket {
            seq: self.next_seq,
            station: station.id,
        };
        self.next_seq += 1;

        info!("Playing '{}' ({}) seq={}", station.name, station.url, ticket.seq);
        self.current_station = Some(station.id);
        self.active = Some(ticket);
        self.last_error = None;
        self.device.load(&station.url, ticket);
        self.device.play();
        self.is_playing = true;
        self.rev += 1;
    }

    /// Pause and rewind.  Keeps the current station selected.
    pub fn stop(&mut self) {
        self.device.pause();
        self.device.seek(0.0);
        if self.is_playing {
            info!("Stopped");
            self.is_playing = false;
            self.rev += 1;
        }
    }

    /// Clamp to [0.0, 1.0] and push to the device.  NaN is ignored.
    pub fn set_volume(&mut self, volume: f32) -> bool {
        if volume.is_nan() {
            debug!("Ignoring NaN volume");
            return false;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.device.set_volume(volume);
        if volume == self.volume {
            return false;
        }
        self.volume = volume;
        self.rev += 1;
        true
    }

    /// Reconcile a device report with our state.  Returns true when the
    /// state changed.
    pub fn on_device_event(&mut self, event: DeviceEvent) -> bool {
        let is_current = self.active == Some(event.ticket)
            && self.current_station == Some(event.ticket.station);
        if !is_current {
            debug!(
                "Dropping stale device event {:?} for seq={} (active {:?})",
                event.kind, event.ticket.seq, self.active
            );
            return false;
        }

        let before = (self.is_playing, self.last_error.clone());
        match event.kind {
            DeviceEventKind::Started => {
                self.is_playing = true;
                self.last_error = None;
            }
            DeviceEventKind::Paused => self.is_playing = false,
            DeviceEventKind::Ended => {
                info!("Stream ended for station {}", event.ticket.station);
                self.is_playing = false;
            }
            DeviceEventKind::Errored(detail) => {
                warn!(
                    "Playback error for station {}: {}",
                    event.ticket.station, detail
                );
                self.is_playing = false;
                self.last_error = Some(detail);
            }
        }

        let changed = before != (self.is_playing, self.last_error.clone());
        if changed {
            self.rev += 1;
        }
        changed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Load(String, LoadTicket),
        Play,
        Pause,
        Seek(f64),
        Volume(f32),
    }

    /// Records every command it receives.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingDevice {
        pub calls: Vec<Call>,
    }

    impl RecordingDevice {
        pub fn take(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl MediaDevice for RecordingDevice {
        fn load(&mut self, url: &str, ticket: LoadTicket) {
            self.calls.push(Call::Load(url.to_string(), ticket));
        }
        fn play(&mut self) {
            self.calls.push(Call::Play);
        }
        fn pause(&mut self) {
            self.calls.push(Call::Pause);
        }
        fn seek(&mut self, secs: f64) {
            self.calls.push(Call::Seek(secs));
        }
        fn set_volume(&mut self, volume: f32) {
            self.calls.push(Call::Volume(volume));
        }
    }

    fn controller() -> PlaybackController<RecordingDevice> {
        let mut c = PlaybackController::new(RecordingDevice::default(), 0.7);
        c.device_mut().take();
        c
    }

    fn station(id: u32) -> Station {
        Catalog::builtin().get(StationId(id)).cloned().unwrap()
    }

    #[test]
    fn test_initial_state_is_idle() {
        let c = PlaybackController::new(RecordingDevice::default(), 0.7);
        assert_eq!(c.status(), PlaybackStatus::Idle);
        assert_eq!(c.current_station(), None);
        assert!(!c.is_playing());
        assert_eq!(c.volume(), 0.7);
        assert_eq!(c.device().calls, vec![Call::Volume(0.7)]);
    }

    #[test]
    fn test_select_from_idle_loads_and_plays() {
        let mut c = controller();
        let a = station(1);
        c.select_station(&a);

        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert_eq!(c.current_station(), Some(a.id));
        let ticket = c.active_ticket().unwrap();
        assert_eq!(ticket.station, a.id);
        assert_eq!(
            c.device_mut().take(),
            vec![Call::Load(a.url.clone(), ticket), Call::Play]
        );
    }

    #[test]
    fn test_reselect_while_playing_pauses_in_place() {
        let mut c = controller();
        let a = station(1);
        c.select_station(&a);
        let ticket = c.active_ticket();
        c.device_mut().take();

        c.select_station(&a);
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert_eq!(c.current_station(), Some(a.id));
        assert_eq!(c.active_ticket(), ticket);
        assert_eq!(c.device_mut().take(), vec![Call::Pause]);
    }

    #[test]
    fn test_reselect_while_paused_reloads() {
        let mut c = controller();
        let a = station(2);
        c.select_station(&a);
        c.select_station(&a);
        let first = c.active_ticket().unwrap();
        c.device_mut().take();

        c.select_station(&a);
        let second = c.active_ticket().unwrap();
        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert!(second.seq > first.seq);
        assert_eq!(
            c.device_mut().take(),
            vec![Call::Load(a.url.clone(), second), Call::Play]
        );
    }

    #[test]
    fn test_switch_station_goes_straight_to_playing() {
        let mut c = controller();
        let (a, b) = (station(1), station(7));
        c.select_station(&a);
        c.device_mut().take();

        c.select_station(&b);
        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert_eq!(c.current_station(), Some(b.id));
        let calls = c.device_mut().take();
        assert!(!calls.contains(&Call::Pause));
        assert!(matches!(&calls[0], Call::Load(url, _) if *url == b.url));
    }

    #[test]
    fn test_stop_keeps_station_and_rewinds() {
        let mut c = controller();
        let a = station(3);
        c.select_station(&a);
        c.device_mut().take();

        c.stop();
        assert!(!c.is_playing());
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert_eq!(c.current_station(), Some(a.id));
        assert_eq!(c.device_mut().take(), vec![Call::Pause, Call::Seek(0.0)]);
    }

    #[test]
    fn test_stop_while_idle_changes_nothing() {
        let mut c = controller();
        let rev = c.rev();
        c.stop();
        assert_eq!(c.status(), PlaybackStatus::Idle);
        assert_eq!(c.rev(), rev);
    }

    #[test]
    fn test_volume_is_clamped() {
        let mut c = controller();
        c.set_volume(-0.3);
        assert_eq!(c.volume(), 0.0);
        c.set_volume(1.7);
        assert_eq!(c.volume(), 1.0);
        c.set_volume(0.42);
        assert_eq!(c.volume(), 0.42);
        assert!(!c.set_volume(f32::NAN));
        assert_eq!(c.volume(), 0.42);
        assert_eq!(
            c.device_mut().take(),
            vec![Call::Volume(0.0), Call::Volume(1.0), Call::Volume(0.42)]
        );
    }

    #[test]
    fn test_volume_does_not_touch_play_state() {
        let mut c = controller();
        c.select_station(&station(1));
        c.set_volume(0.1);
        assert!(c.is_playing());
    }

    #[test]
    fn test_stale_started_event_is_dropped() {
        let mut c = controller();
        let (a, b) = (station(1), station(2));
        c.select_station(&a);
        let stale = c.active_ticket().unwrap();
        c.select_station(&b);
        c.stop();

        let rev = c.rev();
        assert!(!c.on_device_event(DeviceEvent::new(stale, DeviceEventKind::Started)));
        assert!(!c.is_playing());
        assert_eq!(c.rev(), rev);
    }

    #[test]
    fn test_stale_event_for_same_station_earlier_load_is_dropped() {
        let mut c = controller();
        let a = station(4);
        c.select_station(&a);
        let first = c.active_ticket().unwrap();
        c.select_station(&a); // pause
        c.select_station(&a); // reload
        c.stop();

        assert!(!c.on_device_event(DeviceEvent::new(first, DeviceEventKind::Started)));
        assert!(!c.is_playing());
    }

    #[test]
    fn test_device_events_reconcile_is_playing() {
        let mut c = controller();
        c.select_station(&station(5));
        let ticket = c.active_ticket().unwrap();

        assert!(c.on_device_event(DeviceEvent::new(ticket, DeviceEventKind::Paused)));
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert!(c.on_device_event(DeviceEvent::new(ticket, DeviceEventKind::Started)));
        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert!(!c.on_device_event(DeviceEvent::new(ticket, DeviceEventKind::Started)));
        assert!(c.on_device_event(DeviceEvent::new(ticket, DeviceEventKind::Ended)));
        assert_eq!(c.status(), PlaybackStatus::Paused);
    }

    #[test]
    fn test_error_keeps_selection_and_does_not_retry() {
        let mut c = controller();
        let a = station(9);
        c.select_station(&a);
        let ticket = c.active_ticket().unwrap();
        c.device_mut().take();

        let err = DeviceEventKind::Errored("connection refused".into());
        assert!(c.on_device_event(DeviceEvent::new(ticket, err)));
        assert!(!c.is_playing());
        assert_eq!(c.current_station(), Some(a.id));
        assert_eq!(c.last_error(), Some("connection refused"));
        assert!(c.device_mut().take().is_empty());

        // manual retry clears the diagnostic
        c.select_station(&a);
        assert_eq!(c.last_error(), None);
        assert!(c.is_playing());
    }

    #[test]
    fn test_nan_default_volume_falls_back_to_silence() {
        let c = PlaybackController::new(RecordingDevice::default(), f32::NAN);
        assert_eq!(c.volume(), 0.0);
    }
}
