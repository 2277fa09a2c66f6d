//! Channel media handlers: tuner stream, HLS playlist, segments and keys

use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::convert::Infallible;
use tracing::{debug, info};

use crate::errors::AppResult;
use crate::models::Channel;
use crate::upstream::render_playlist;
use crate::web::{
    AppState,
    responses::{HLS_PLAYLIST, MPEGTS, OCTET_STREAM, document, media_response},
};

/// Multiplexed MPEG-TS stream for DVR clients tuning the channel directly.
/// The listener is released when the client disconnects and the body drops.
pub async fn channel_stream(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> AppResult<Response> {
    let channel = state.channel(&number)?;
    let listener = state.pool.claim_listener(&channel)?;
    info!(
        channel = %channel.number,
        listener = %listener.id(),
        tuner = %listener.tuner().id(),
        "Client tuned channel"
    );

    let body = Body::from_stream(listener.map(Ok::<_, Infallible>));
    Ok(media_response(MPEGTS, body))
}

/// Dispatch for everything below `/channel/{number}/`
pub async fn channel_resource(
    State(state): State<AppState>,
    Path((number, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> AppResult<Response> {
    let channel = state.channel(&number)?;

    if path == "playlist.m3u8" {
        return channel_playlist(&state, &channel).await;
    }
    if let Some(encoded) = path.strip_prefix("key/") {
        return channel_key(&state, &channel, encoded).await;
    }
    if path.ends_with(".ts") {
        let relative = match query {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };
        return channel_segment(&state, &channel, &relative).await;
    }

    debug!(channel = %channel.number, path = %path, "Unknown channel resource");
    Ok(StatusCode::NOT_FOUND.into_response())
}

async fn channel_playlist(state: &AppState, channel: &Channel) -> AppResult<Response> {
    let playlist = state.resolver.resolve(channel).await?;
    let body = render_playlist(&playlist)?;
    Ok(document(HLS_PLAYLIST, body))
}

async fn channel_segment(state: &AppState, channel: &Channel, path: &str) -> AppResult<Response> {
    let stream = state.segments.stream_segment(channel, path).await?;
    Ok(media_response(MPEGTS, Body::from_stream(stream)))
}

async fn channel_key(state: &AppState, channel: &Channel, encoded: &str) -> AppResult<Response> {
    let key = state.keys.fetch_key(channel, encoded).await?;
    Ok(media_response(OCTET_STREAM, Body::from(key)))
}
