//! HDHomeRun discovery endpoints plus M3U and XMLTV channel documents

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
    response::Response,
};
use quick_xml::escape::escape;
use serde::Serialize;
use std::sync::Arc;

use crate::models::Channel;
use crate::web::{AppState, responses::document};

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    #[serde(rename = "FriendlyName")]
    pub friendly_name: String,
    #[serde(rename = "Manufacturer")]
    pub manufacturer: String,
    #[serde(rename = "ModelNumber")]
    pub model_number: String,
    #[serde(rename = "FirmwareName")]
    pub firmware_name: String,
    #[serde(rename = "TunerCount")]
    pub tuner_count: usize,
    #[serde(rename = "FirmwareVersion")]
    pub firmware_version: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    #[serde(rename = "DeviceAuth")]
    pub device_auth: String,
    #[serde(rename = "BaseURL")]
    pub base_url: String,
    #[serde(rename = "LineupURL")]
    pub lineup_url: String,
}

#[derive(Debug, Serialize)]
pub struct LineupEntry {
    #[serde(rename = "GuideName")]
    pub guide_name: String,
    #[serde(rename = "GuideNumber")]
    pub guide_number: String,
    #[serde(rename = "URL")]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct LineupStatus {
    #[serde(rename = "ScanInProgress")]
    pub scan_in_progress: u8,
    #[serde(rename = "ScanPossible")]
    pub scan_possible: u8,
    #[serde(rename = "Source")]
    pub source: &'static str,
    #[serde(rename = "SourceList")]
    pub source_list: Vec<&'static str>,
}

/// Base URL clients used to reach us, taken from the Host header
fn public_base_url(headers: &HeaderMap, state: &AppState) -> String {
    headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .map(|host| format!("http://{host}"))
        .or_else(|| {
            state
                .config
                .web
                .internal_url()
                .ok()
                .map(|url| url.as_str().trim_end_matches('/').to_string())
        })
        .unwrap_or_default()
}

fn sorted_channels(state: &AppState) -> Vec<&Arc<Channel>> {
    let mut channels: Vec<_> = state.registry.iter().collect();
    channels.sort_by_key(|c| (c.number.parse::<u64>().unwrap_or(u64::MAX), c.number.clone()));
    channels
}

pub async fn discover_json(State(state): State<AppState>, headers: HeaderMap) -> Json<DiscoverResponse> {
    let base = public_base_url(&headers, &state);
    let device = &state.config.device;

    Json(DiscoverResponse {
        friendly_name: device.friendly_name.clone(),
        manufacturer: "hdhr-proxy - Silicondust".to_string(),
        model_number: device.model_number.clone(),
        firmware_name: device.firmware_name.clone(),
        tuner_count: state.pool.reported_capacity(),
        firmware_version: device.firmware_version.clone(),
        device_id: device.device_id.clone(),
        device_auth: String::new(),
        base_url: format!("{base}/"),
        lineup_url: format!("{base}/lineup.json"),
    })
}

pub async fn lineup_status_json() -> Json<LineupStatus> {
    Json(LineupStatus {
        scan_in_progress: 0,
        scan_possible: 1,
        source: "Cable",
        source_list: vec!["Cable"],
    })
}

pub async fn lineup_json(State(state): State<AppState>, headers: HeaderMap) -> Json<Vec<LineupEntry>> {
    let base = public_base_url(&headers, &state);
    let lineup = sorted_channels(&state)
        .into_iter()
        .map(|channel| LineupEntry {
            guide_name: channel.name.clone(),
            guide_number: channel.number.clone(),
            url: format!("{base}{}", channel.proxy_path()),
        })
        .collect();
    Json(lineup)
}

/// M3U playlist of every channel with an EPG id
pub async fn iptv_m3u(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let base = public_base_url(&headers, &state);
    let mut output = String::from("#EXTM3U\n");

    for channel in sorted_channels(&state) {
        if channel.xmltv_id.is_empty() {
            continue;
        }
        output.push_str(&format!(
            "#EXTINF:-1 CUID=\"{n}\" tvg-id=\"{id}\" tvg-chno=\"{n}\" channel-id=\"{n}\",{name}\n",
            n = channel.number,
            id = channel.xmltv_id,
            name = channel.name,
        ));
        output.push_str(&format!("{base}{}\n", channel.proxy_path()));
    }

    document("text/plain; charset=utf-8", output)
}

pub async fn xmltv_xml(State(state): State<AppState>) -> Response {
    let mut output = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<tv generator-info-name=\"hdhr-proxy\">",
    );

    for channel in sorted_channels(&state) {
        output.push_str(&format!(
            "<channel id=\"{n}\"><display-name lang=\"en\">{name}</display-name><lcn>{n}</lcn></channel>",
            n = escape(channel.number.as_str()),
            name = escape(channel.name.as_str()),
        ));
    }
    output.push_str("</tv>");

    document("application/xml; charset=utf-8", output)
}
