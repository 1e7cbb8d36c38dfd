use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};
use tracing::warn;

use crate::cache::PlaylistSource;

lazy_static! {
    pub static ref PLAYLIST_LOADS: IntCounterVec = register_int_counter_vec!(
        "m3u_manager_playlist_loads_total",
        "Playlists loaded, by source and outcome",
        &["source", "outcome"]
    )
    .unwrap();
    pub static ref DROPPED_ENTRIES: IntCounter = register_int_counter!(
        "m3u_manager_dropped_entries_total",
        "EXTINF entries skipped because they had no url or were malformed"
    )
    .unwrap();
    pub static ref LOADED_CHANNELS: IntGauge = register_int_gauge!(
        "m3u_manager_loaded_channels",
        "Channels in the currently loaded playlist"
    )
    .unwrap();
}

pub fn record_load(source: PlaylistSource, channels: usize, dropped: usize) {
    let outcome = if channels == 0 { "empty" } else { "ok" };
    let source = source.to_string();
    PLAYLIST_LOADS
        .with_label_values(&[source.as_str(), outcome])
        .inc();
    DROPPED_ENTRIES.inc_by(dropped as u64);
}

pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
