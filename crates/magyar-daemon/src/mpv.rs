/// mpv-backed `MediaDevice`.
///
/// Architecture:
///
/// ```text
///   MpvDevice (MediaDevice impl, owned by PlaybackController)
///         │  DeviceCommand via unbounded mpsc (never blocks the core)
///         ▼
///   device_task  ── owns MpvDriver + MpvHandle, attributes mpv events to loads
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → device_task
/// ```
///
/// Every `loadfile` produces exactly one `start-file` event.  The device task
/// queues the ticket of each load and pops it on `start-file`, so every later
/// event is tagged with the load it belongs to.  Events from the replaced file
/// (its `end-file`) still carry the old ticket and are dropped by the core.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use magyar_proto::playback::{DeviceEvent, DeviceEventKind, LoadTicket, MediaDevice};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::core::DaemonEvent;

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

/// Fixed observe_property IDs.  We match on these in property-change events.
pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;

/// Synthetic event name pushed by the reader when the IPC connection drops.
const EVENT_CONNECTION_CLOSED: &str = "connection-closed";

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["set_property", "time-pos", secs])).await?;
        Ok(())
    }

    /// Register observe_property for the properties playback status is
    /// derived from.  Must be called after every fresh connection.
    pub async fn observe_properties(&self) {
        let props = [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process and manages (re)connection.
pub struct MpvDriver {
    socket_name: String,
    /// Fixed binary path; `None` searches `MPV_PATH`, beside the exe, then `PATH`.
    binary: Option<PathBuf>,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new(initial_volume: f32) -> Self {
        Self {
            socket_name: magyar_proto::platform::mpv_socket_name(),
            binary: None,
            process: None,
            last_volume: initial_volume,
        }
    }

    #[cfg(test)]
    fn with_binary(initial_volume: f32, binary: impl Into<PathBuf>, socket_name: String) -> Self {
        Self {
            socket_name,
            binary: Some(binary.into()),
            process: None,
            last_volume: initial_volume,
        }
    }

    fn mpv_binary(&self) -> anyhow::Result<PathBuf> {
        let found = match &self.binary {
            Some(path) => path.exists().then(|| path.clone()),
            None => magyar_proto::platform::find_mpv_binary(),
        };
        found.ok_or_else(|| anyhow::anyhow!("mpv binary not found"))
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    async fn spawn_process(&mut self, mpv_binary: PathBuf) -> anyhow::Result<()> {
        self.kill().await;

        info!("mpv: spawning {:?}", mpv_binary);

        let vol_arg = format!(
            "--volume={}",
            (self.last_volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(magyar_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let mpv_binary = self.mpv_binary()?;
        let socket_path = PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process(mpv_binary).await?;

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(start_io_tasks(stream, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let mpv_binary = self.mpv_binary()?;
        self.spawn_process(mpv_binary).await?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                return Ok(start_io_tasks(client, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<T>(stream: T, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = BufReader::new(read_half);

    // pending map: req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
    let closed = json!({ "event": EVENT_CONNECTION_CLOSED });
    let _ = event_tx.send(MpvEvent { raw: closed }).await;
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event translation ─────────────────────────────────────────────────────────

/// Observed mpv properties and the load each event is attributed to.
#[derive(Debug, Default)]
pub struct EventTracker {
    /// Loads sent to mpv whose `start-file` has not arrived yet.
    queued: VecDeque<LoadTicket>,
    /// Load the current mpv file belongs to.
    attributed: Option<LoadTicket>,
    core_idle: Option<bool>,
    pause: bool,
}

impl EventTracker {
    pub fn on_load(&mut self, ticket: LoadTicket) {
        self.queued.push_back(ticket);
    }

    /// A load that never reached mpv (IPC failure): no `start-file` will come.
    pub fn on_load_failed(&mut self, ticket: LoadTicket) {
        self.queued.retain(|t| *t != ticket);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Map a raw mpv event onto a device event for the load it belongs to.
    pub fn translate(&mut self, evt: &MpvEvent) -> Option<DeviceEvent> {
        if let Some((obs_id, data)) = evt.as_property_change() {
            let kind = match obs_id {
                OBS_PAUSE => {
                    let paused = data.as_bool().unwrap_or(false);
                    if paused == self.pause {
                        return None;
                    }
                    self.pause = paused;
                    if paused {
                        DeviceEventKind::Paused
                    } else if self.core_idle == Some(false) {
                        DeviceEventKind::Started
                    } else {
                        return None;
                    }
                }
                OBS_CORE_IDLE => {
                    let idle = data.as_bool();
                    if idle == self.core_idle {
                        return None;
                    }
                    self.core_idle = idle;
                    // audio flowing and not paused; idle while unpaused is buffering
                    if idle == Some(false) && !self.pause {
                        DeviceEventKind::Started
                    } else {
                        return None;
                    }
                }
                _ => return None,
            };
            return self.attributed.map(|t| DeviceEvent::new(t, kind));
        }

        match evt.event_name() {
            Some("start-file") => {
                self.attributed = self.queued.pop_front();
                self.core_idle = Some(true);
                debug!("mpv: start-file attributed to {:?}", self.attributed);
                None
            }
            Some("end-file") => {
                let reason = evt
                    .raw
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                info!("mpv: end-file reason={}", reason);
                self.core_idle = Some(true);
                let kind = match reason {
                    "error" => {
                        let detail = evt
                            .raw
                            .get("file_error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("stream error");
                        DeviceEventKind::Errored(detail.to_string())
                    }
                    "redirect" => return None,
                    _ => DeviceEventKind::Ended,
                };
                self.attributed.map(|t| DeviceEvent::new(t, kind))
            }
            Some(EVENT_CONNECTION_CLOSED) => {
                let ticket = self.attributed.or_else(|| self.queued.back().copied());
                self.reset();
                ticket.map(|t| {
                    DeviceEvent::new(t, DeviceEventKind::Errored("mpv connection lost".into()))
                })
            }
            _ => None,
        }
    }
}

// ── device ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum DeviceCommand {
    Load { url: String, ticket: LoadTicket },
    Play,
    Pause,
    Seek(f64),
    Volume(f32),
}

/// `MediaDevice` that forwards commands to the device task.
pub struct MpvDevice {
    tx: mpsc::UnboundedSender<DeviceCommand>,
}

impl MpvDevice {
    /// Start the device task.  mpv itself is spawned lazily on the first
    /// command that needs it.  Device events are delivered to `core_tx`.
    pub fn spawn(core_tx: mpsc::Sender<DaemonEvent>, initial_volume: f32) -> Self {
        Self::spawn_with_driver(core_tx, MpvDriver::new(initial_volume))
    }

    fn spawn_with_driver(core_tx: mpsc::Sender<DaemonEvent>, driver: MpvDriver) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(device_task(rx, core_tx, driver));
        Self { tx }
    }

    fn send(&self, cmd: DeviceCommand) {
        if self.tx.send(cmd).is_err() {
            warn!("mpv device task gone, dropping command");
        }
    }
}

impl MediaDevice for MpvDevice {
    fn load(&mut self, url: &str, ticket: LoadTicket) {
        self.send(DeviceCommand::Load {
            url: url.to_string(),
            ticket,
        });
    }

    fn play(&mut self) {
        self.send(DeviceCommand::Play);
    }

    fn pause(&mut self) {
        self.send(DeviceCommand::Pause);
    }

    fn seek(&mut self, secs: f64) {
        self.send(DeviceCommand::Seek(secs));
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(DeviceCommand::Volume(volume));
    }
}

struct DeviceTask {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    tracker: EventTracker,
    mpv_tx: mpsc::Sender<MpvEvent>,
    core_tx: mpsc::Sender<DaemonEvent>,
}

async fn device_task(
    mut cmd_rx: mpsc::UnboundedReceiver<DeviceCommand>,
    core_tx: mpsc::Sender<DaemonEvent>,
    driver: MpvDriver,
) {
    let (mut task, mut mpv_rx) = DeviceTask::new(driver, core_tx);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => task.handle_command(cmd).await,
                None => break,
            },
            Some(evt) = mpv_rx.recv() => {
                if evt.event_name() == Some(EVENT_CONNECTION_CLOSED) {
                    warn!("mpv: IPC connection lost");
                    task.handle = None;
                }
                if let Some(device_event) = task.tracker.translate(&evt) {
                    task.emit(device_event).await;
                }
            }
        }
    }

    info!("mpv device: shutting down");
    task.driver.kill().await;
}

impl DeviceTask {
    fn new(driver: MpvDriver, core_tx: mpsc::Sender<DaemonEvent>) -> (Self, mpsc::Receiver<MpvEvent>) {
        let (mpv_tx, mpv_rx) = mpsc::channel::<MpvEvent>(64);
        let task = Self {
            driver,
            handle: None,
            tracker: EventTracker::default(),
            mpv_tx,
            core_tx,
        };
        (task, mpv_rx)
    }

    async fn emit(&self, event: DeviceEvent) {
        if self.core_tx.send(DaemonEvent::Device(event)).await.is_err() {
            debug!("mpv device: core loop gone");
        }
    }

    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("mpv: process died, dropping handle");
            self.handle = None;
            self.tracker.reset();
        }
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        let handle = self.driver.spawn_and_connect(self.mpv_tx.clone()).await?;
        handle.observe_properties().await;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn handle_command(&mut self, cmd: DeviceCommand) {
        debug!("mpv device: {:?}", cmd);
        if let DeviceCommand::Volume(v) = cmd {
            self.driver.last_volume = v;
        }
        if self.handle.is_none() {
            match cmd {
                // applied via --volume when mpv is spawned later
                DeviceCommand::Volume(_) => return,
                // nothing is playing, nothing to pause or rewind
                DeviceCommand::Pause | DeviceCommand::Seek(_) => {
                    debug!("mpv not running, dropping {:?}", cmd);
                    return;
                }
                _ => {}
            }
        }

        let handle = match self.ensure_handle().await {
            Ok(h) => h,
            Err(e) => {
                warn!("mpv unavailable: {}", e);
                if let DeviceCommand::Load { ticket, .. } = cmd {
                    let detail = format!("media device unavailable: {e}");
                    self.emit(DeviceEvent::new(ticket, DeviceEventKind::Errored(detail)))
                        .await;
                }
                return;
            }
        };

        let result = match cmd {
            DeviceCommand::Load { url, ticket } => {
                self.tracker.on_load(ticket);
                let loaded = handle.load_stream(&url).await;
                if let Err(e) = &loaded {
                    self.tracker.on_load_failed(ticket);
                    self.emit(DeviceEvent::new(
                        ticket,
                        DeviceEventKind::Errored(format!("failed to load stream: {e}")),
                    ))
                    .await;
                }
                loaded
            }
            DeviceCommand::Play => handle.set_pause(false).await,
            DeviceCommand::Pause => handle.set_pause(true).await,
            DeviceCommand::Seek(secs) => match handle.seek_to(secs).await {
                // live streams are often not seekable
                Err(e) => {
                    debug!("mpv: seek to {} ignored: {}", secs, e);
                    Ok(())
                }
                ok => ok,
            },
            DeviceCommand::Volume(v) => handle.set_volume(v).await,
        };

        if let Err(e) = result {
            warn!("mpv command failed: {}", e);
        }
    }
}
