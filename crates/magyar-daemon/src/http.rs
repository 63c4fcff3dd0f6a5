use crate::core::{DaemonEvent, StateHandle};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use magyar_proto::filter::GenreFilter;
use magyar_proto::protocol::{Command, RadioSnapshot, Station, StationId};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state: StateHandle,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

/// A station row as the browser list shows it.
#[derive(Serialize)]
struct StationView {
    #[serde(flatten)]
    station: Station,
    favorite: bool,
    current: bool,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: StateHandle,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: StateHandle, event_tx: mpsc::Sender<DaemonEvent>) -> Router {
    let app_state = HttpState { state, event_tx };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/stations", get(get_stations))
        .route("/api/genres", get(get_genres))
        .route("/api/play/:id", get(play_station).post(play_station))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/favorite/:id", get(toggle_favorite).post(toggle_favorite))
        .route("/api/search", get(set_search).post(set_search))
        .route("/api/genre/:genre", get(set_genre).post(set_genre))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(app_state)
}

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to send command: core loop gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<RadioSnapshot> {
    Json(state.state.get_state().await)
}

/// Visible stations in catalog order, under the current filter.
async fn get_stations(State(state): State<HttpState>) -> Json<Vec<StationView>> {
    let snap = state.state.get_state().await;
    let rows = snap
        .visible
        .iter()
        .filter_map(|id| snap.station(*id))
        .map(|s| StationView {
            station: s.clone(),
            favorite: snap.favorites.contains(&s.id),
            current: snap.current_station == Some(s.id),
        })
        .collect();
    Json(rows)
}

async fn get_genres(State(state): State<HttpState>) -> Json<Vec<String>> {
    let snap = state.state.get_state().await;
    let mut genres = vec![GenreFilter::All.label().to_string()];
    genres.extend(snap.genres);
    Json(genres)
}

async fn play_station(State(state): State<HttpState>, Path(id): Path<u32>) -> StatusCode {
    info!("HTTP API: Play station {}", id);
    let cmd = Command::Play {
        station_id: StationId(id),
    };
    send_command(&state, cmd).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    send_command(&state, Command::Stop).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let vol = (volume as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: Set volume to {}%", volume);
    send_command(&state, Command::Volume { value: vol }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let snap = state.state.get_state().await;
    let volume = (snap.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn toggle_favorite(State(state): State<HttpState>, Path(id): Path<u32>) -> StatusCode {
    info!("HTTP API: Toggle favorite {}", id);
    let cmd = Command::ToggleFavorite {
        station_id: StationId(id),
    };
    send_command(&state, cmd).await
}

async fn set_search(
    State(state): State<HttpState>,
    Query(params): Query<SearchParams>,
) -> StatusCode {
    info!("HTTP API: Search {:?}", params.q);
    send_command(&state, Command::SetSearch { text: params.q }).await
}

async fn set_genre(State(state): State<HttpState>, Path(genre): Path<String>) -> StatusCode {
    info!("HTTP API: Genre {:?}", genre);
    let cmd = Command::SetGenre {
        genre: GenreFilter::from(genre),
    };
    send_command(&state, cmd).await
}
