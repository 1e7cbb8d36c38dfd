pub mod cache;
pub mod channels;
pub mod favorites;
pub mod library;
pub mod metrics;
pub mod settings;
pub mod source;
mod store;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use bytes::Bytes;
use cache::{CacheInfo, ChannelCache, PlaylistSource, CACHE_EXPIRY};
use channels::{channel_id, parse_m3u_with, Channel, ParseStats, PlaylistInput};
use favorites::FavoritesStore;
use library::{filter_channels, group_channels, ChannelFilter, ChannelGroup};
use serde::{Deserialize, Serialize};
use settings::{AppSettings, SettingsPatch, SettingsStore};
use source::{is_playlist_filename, parse_remote_url, PlaylistFetcher, UpstreamStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub const LOGO_CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub cache_expiry: Duration,
    pub fetch_timeout: Duration,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache_expiry: CACHE_EXPIRY,
            fetch_timeout: Duration::from_secs(30),
            user_agent: concat!("m3u-manager/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

struct AppState {
    channels: RwLock<Vec<Channel>>,
    cache: ChannelCache,
    favorites: FavoritesStore,
    settings: SettingsStore,
    fetcher: PlaylistFetcher,
}

type SharedState = Arc<AppState>;

pub fn create_app(config: AppConfig, channels: Vec<Channel>) -> anyhow::Result<Router> {
    let fetcher = PlaylistFetcher::new(config.fetch_timeout, &config.user_agent)?;
    metrics::LOADED_CHANNELS.set(channels.len() as i64);
    let state = Arc::new(AppState {
        channels: RwLock::new(channels),
        cache: ChannelCache::new(&config.data_dir, config.cache_expiry),
        favorites: FavoritesStore::new(&config.data_dir),
        settings: SettingsStore::new(&config.data_dir),
        fetcher,
    });

    Ok(Router::new()
        .route("/", get(index_handler))
        .route("/api/channels", get(channels_api_handler))
        .route("/api/groups", get(groups_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/playlist/upload", post(upload_handler))
        .route("/api/playlist/url", post(load_url_handler))
        .route("/api/refresh-m3u", post(refresh_m3u_handler))
        .route("/api/proxy-logo", get(proxy_logo_handler))
        .route("/api/cache", get(cache_info_handler).delete(clear_cache_handler))
        .route(
            "/api/favorites",
            get(list_favorites_handler)
                .post(add_favorite_handler)
                .delete(clear_favorites_handler),
        )
        .route("/api/favorites/toggle", post(toggle_favorite_handler))
        .route("/api/favorites/{id}", delete(remove_favorite_handler))
        .route(
            "/api/settings",
            get(get_settings_handler)
                .patch(patch_settings_handler)
                .delete(clear_settings_handler),
        )
        .route("/metrics", get(metrics_handler))
        .fallback(fallback_handler)
        .with_state(state))
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn internal_error(context: &str, err: anyhow::Error) -> Response {
    error!("{}: {:#}", context, err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, context)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

async fn fallback_handler(method: Method, uri: Uri, headers: HeaderMap) -> impl IntoResponse {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>");
    info!(
        "HTTP 404: method={} uri={} UA=\"{}\"",
        method,
        uri,
        user_agent
    );
    (StatusCode::NOT_FOUND, "Not found")
}

async fn index_handler(State(state): State<SharedState>) -> Html<String> {
    let channels = state.channels.read().await;
    Html(render_index(&channels))
}

fn render_index(channels: &[Channel]) -> String {
    let groups = group_channels(channels);

    let mut html = String::from(r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>M3U Manager</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
               margin: 0; padding: 20px; background: #0d0d0d; color: #fff; }
        h1 { font-size: 2rem; margin: 0 0 10px; }
        .stats { color: #a0a0a0; margin-bottom: 20px; }
        ul { list-style: none; padding: 0; }
        li { padding: 8px 12px; background: #1a1a1a; margin-bottom: 6px; border-radius: 8px;
             display: flex; justify-content: space-between; }
        .count { color: #a0a0a0; }
    </style>
</head>
<body>
    <h1>M3U Manager</h1>
"#);

    html.push_str(&format!(
        "    <div class=\"stats\">{} channels &middot; {} groups</div>\n    <ul>\n",
        channels.len(),
        groups.len()
    ));
    for group in &groups {
        html.push_str(&format!(
            "        <li><a href=\"/api/channels?group={}\">{}</a><span class=\"count\">{}</span></li>\n",
            urlencoding::encode(&group.title),
            html_escape::encode_text(&group.title),
            group.count
        ));
    }
    html.push_str("    </ul>\n</body>\n</html>\n");
    html
}

async fn channels_api_handler(
    State(state): State<SharedState>,
    Query(filter): Query<ChannelFilter>,
) -> Json<Vec<Channel>> {
    let channels = state.channels.read().await;
    Json(filter_channels(&channels, &filter))
}

async fn groups_handler(State(state): State<SharedState>) -> Json<Vec<ChannelGroup>> {
    let channels = state.channels.read().await;
    Json(group_channels(&channels))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_channels: usize,
    pub total_groups: usize,
}

async fn stats_handler(State(state): State<SharedState>) -> Json<Stats> {
    let channels = state.channels.read().await;
    Json(Stats {
        total_channels: channels.len(),
        total_groups: group_channels(&channels).len(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResponse {
    pub count: usize,
    pub dropped: usize,
    pub source: PlaylistSource,
    pub source_identifier: String,
}

fn parse_counted<'a>(input: impl Into<PlaylistInput<'a>>) -> (Vec<Channel>, usize) {
    let stats = ParseStats::default();
    let channels = parse_m3u_with(input, &stats);
    (channels, stats.dropped())
}

/// Replace the loaded playlist and cache it. An empty parse result is rejected.
async fn install_playlist(
    state: &AppState,
    channels: Vec<Channel>,
    dropped: usize,
    source: PlaylistSource,
    source_identifier: String,
) -> Response {
    metrics::record_load(source, channels.len(), dropped);
    if channels.is_empty() {
        warn!(
            "No channels found: source={} id=\"{}\" dropped={}",
            source,
            source_identifier,
            dropped
        );
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "No channels found. Please check the file format.",
        );
    }

    // Held across the save so the cache slot and the live list change together.
    let mut current = state.channels.write().await;
    if let Err(e) = state.cache.save(&channels, source, &source_identifier).await {
        warn!("Failed to cache channels: {:#}", e);
    }

    let count = channels.len();
    metrics::LOADED_CHANNELS.set(count as i64);
    *current = channels;
    drop(current);
    info!(
        "Loaded playlist: source={} id=\"{}\" channels={} dropped={}",
        source,
        source_identifier,
        count,
        dropped
    );

    Json(LoadResponse {
        count,
        dropped,
        source,
        source_identifier,
    })
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UploadParams {
    filename: Option<String>,
}

async fn upload_handler(
    State(state): State<SharedState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Response {
    let filename = non_blank(params.filename.as_deref())
        .unwrap_or("upload.m3u")
        .to_string();
    if !is_playlist_filename(&filename) {
        return error_response(StatusCode::BAD_REQUEST, "Please select a valid M3U file");
    }

    let (channels, dropped) = parse_counted(&body[..]);
    install_playlist(&state, channels, dropped, PlaylistSource::File, filename).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UrlRequest {
    url: Option<String>,
}

async fn load_url_handler(
    State(state): State<SharedState>,
    Json(req): Json<UrlRequest>,
) -> Response {
    let Some(url) = non_blank(req.url.as_deref()).map(str::to_string) else {
        return error_response(StatusCode::BAD_REQUEST, "Please enter a valid M3U URL");
    };
    if let Err(e) = parse_remote_url(&url) {
        return error_response(StatusCode::BAD_REQUEST, format!("{e:#}"));
    }

    let patch = SettingsPatch {
        m3u_url: Some(url.clone()),
        ..Default::default()
    };
    if let Err(e) = state.settings.update(patch).await {
        warn!("Failed to save playlist url: {:#}", e);
    }

    let text = match state.fetcher.fetch_playlist(&url).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to fetch playlist: url={} err={:#}", url, e);
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("Failed to fetch M3U data: {e:#}"),
            );
        }
    };

    let (channels, dropped) = parse_counted(text.as_str());
    let response = install_playlist(&state, channels, dropped, PlaylistSource::Url, url.clone()).await;
    if response.status().is_success() {
        if let Err(e) = state.settings.add_url_to_history(&url).await {
            warn!("Failed to update url history: {:#}", e);
        }
    }
    response
}

/// Relay for clients that cannot fetch the playlist themselves.
async fn refresh_m3u_handler(
    State(state): State<SharedState>,
    Json(req): Json<UrlRequest>,
) -> Response {
    let Some(url) = non_blank(req.url.as_deref()) else {
        return error_response(StatusCode::BAD_REQUEST, "No url provided");
    };
    if let Err(e) = parse_remote_url(url) {
        return error_response(StatusCode::BAD_REQUEST, format!("{e:#}"));
    }

    match state.fetcher.fetch_playlist(url).await {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response(),
        Err(e) => {
            error!("Error fetching M3U data: url={} err={:#}", url, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch M3U data")
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogoParams {
    url: Option<String>,
}

async fn proxy_logo_handler(
    State(state): State<SharedState>,
    Query(params): Query<LogoParams>,
) -> Response {
    let Some(url) = non_blank(params.url.as_deref()) else {
        return error_response(StatusCode::BAD_REQUEST, "No url provided");
    };
    if let Err(e) = parse_remote_url(url) {
        return error_response(StatusCode::BAD_REQUEST, format!("{e:#}"));
    }

    match state.fetcher.fetch_logo(url).await {
        Ok(logo) => (
            [
                (header::CONTENT_TYPE, logo.content_type),
                (header::CACHE_CONTROL, LOGO_CACHE_CONTROL.to_string()),
            ],
            logo.bytes,
        )
            .into_response(),
        Err(e) if e.downcast_ref::<UpstreamStatus>().is_some() => {
            warn!("Logo upstream error: url={} err={}", url, e);
            error_response(StatusCode::BAD_GATEWAY, "Failed to fetch image")
        }
        Err(e) => {
            warn!("Logo fetch failed: url={} err={:#}", url, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching image")
        }
    }
}

async fn cache_info_handler(State(state): State<SharedState>) -> Response {
    match state.cache.info().await {
        Some(info) => Json::<CacheInfo>(info).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No cached playlist"),
    }
}

async fn clear_cache_handler(State(state): State<SharedState>) -> Response {
    match state.cache.clear().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal_error("Failed to clear channel cache", e),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FavoriteResponse {
    pub id: String,
    pub favorite: bool,
}

async fn list_favorites_handler(State(state): State<SharedState>) -> Json<Vec<Channel>> {
    Json(state.favorites.list().await)
}

async fn add_favorite_handler(
    State(state): State<SharedState>,
    Json(channel): Json<Channel>,
) -> Response {
    match state.favorites.add(&channel).await {
        Ok(added) => {
            let status = if added { StatusCode::CREATED } else { StatusCode::OK };
            let body = FavoriteResponse {
                id: channel_id(&channel),
                favorite: true,
            };
            (status, Json(body)).into_response()
        }
        Err(e) => internal_error("Failed to add favorite", e),
    }
}

async fn toggle_favorite_handler(
    State(state): State<SharedState>,
    Json(channel): Json<Channel>,
) -> Response {
    match state.favorites.toggle(&channel).await {
        Ok(favorite) => Json(FavoriteResponse {
            id: channel_id(&channel),
            favorite,
        })
        .into_response(),
        Err(e) => internal_error("Failed to toggle favorite", e),
    }
}

async fn remove_favorite_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Response {
    match state.favorites.remove_id(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Favorite not found"),
        Err(e) => internal_error("Failed to remove favorite", e),
    }
}

async fn clear_favorites_handler(State(state): State<SharedState>) -> Response {
    match state.favorites.clear().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal_error("Failed to clear favorites", e),
    }
}

async fn get_settings_handler(State(state): State<SharedState>) -> Json<AppSettings> {
    Json(state.settings.get().await)
}

async fn patch_settings_handler(
    State(state): State<SharedState>,
    Json(patch): Json<SettingsPatch>,
) -> Response {
    match state.settings.update(patch).await {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => internal_error("Failed to save settings", e),
    }
}

async fn clear_settings_handler(State(state): State<SharedState>) -> Response {
    match state.settings.clear().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal_error("Failed to clear settings", e),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}
