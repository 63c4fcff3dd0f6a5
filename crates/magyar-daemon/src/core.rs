/// DaemonCore: the single owner of the radio state.
///
/// Every external input (socket clients, HTTP handlers, the media device)
/// arrives as a `DaemonEvent` on one mpsc channel and is applied in order.
/// After each event that moved the revision, the fresh snapshot is published
/// to the shared `StateHandle` and `StateUpdated` is broadcast.
use std::sync::Arc;

use magyar_proto::playback::{DeviceEvent, MediaDevice};
use magyar_proto::protocol::{Command, RadioSnapshot};
use magyar_proto::state::RadioCore;
use magyar_proto::store::KeyValueStore;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info};

use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Playback report from the media device, tagged with its load ticket.
    Device(DeviceEvent),
    /// Shutdown requested.
    Shutdown,
}

// ── StateHandle ───────────────────────────────────────────────────────────────

/// Read-only view of the latest published snapshot, shared with the servers.
#[derive(Clone, Default)]
pub struct StateHandle {
    snapshot: Arc<RwLock<RadioSnapshot>>,
}

impl StateHandle {
    pub fn new(initial: RadioSnapshot) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn get_state(&self) -> RadioSnapshot {
        self.snapshot.read().await.clone()
    }

    async fn publish(&self, snapshot: RadioSnapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore<D: MediaDevice, S: KeyValueStore> {
    radio: RadioCore<D, S>,
    state: StateHandle,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl<D: MediaDevice, S: KeyValueStore> DaemonCore<D, S> {
    pub fn new(radio: RadioCore<D, S>, broadcast_tx: broadcast::Sender<BroadcastMessage>) -> Self {
        let state = StateHandle::new(radio.snapshot());
        Self {
            radio,
            state,
            broadcast_tx,
        }
    }

    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender has been dropped.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        while let Some(evt) = event_rx.recv().await {
            if !self.handle_event(evt).await {
                info!("DaemonCore: shutdown requested");
                return Ok(());
            }
        }

        info!("DaemonCore: event channel closed, shutting down");
        Ok(())
    }

    /// Apply one event.  Returns false once the loop should stop.
    async fn handle_event(&mut self, evt: DaemonEvent) -> bool {
        let changed = match evt {
            DaemonEvent::Shutdown => return false,
            DaemonEvent::ClientCommand(cmd) => {
                info!("DaemonCore: command {:?}", cmd);
                self.radio.apply(cmd)
            }
            DaemonEvent::Device(event) => {
                debug!("DaemonCore: device event {:?}", event);
                self.radio.on_device_event(event)
            }
        };

        if changed {
            self.state.publish(self.radio.snapshot()).await;
            // no receivers is fine
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
        true
    }
}
