//! Per-channel upstream session resolution
//!
//! Resolving a channel scrapes its landing page for the live index playlist,
//! follows the first variant to the media playlist and rewrites every
//! encryption key to a local `/channel/{number}/key/{encoded}` path. The media
//! playlist URL and the landing page (used as referer) are cached per channel.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use m3u8_rs::{MediaPlaylist, Playlist};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::client::OriginClient;
use crate::config::UpstreamConfig;
use crate::errors::{AppError, AppResult, UpstreamError, UpstreamResult};
use crate::models::Channel;

/// Cached origin state for one channel
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamSession {
    /// Absolute URL of the media playlist, segment paths are relative to it
    pub playlist_url: Url,
    /// Final landing page URL, sent as referer on every origin request
    pub referer: Url,
    pub resolved_at: Instant,
    pub resolved_at_utc: DateTime<Utc>,
    /// Origins (`scheme://host:port`) of every key URL the channel's
    /// playlists have referenced so far
    pub key_origins: Vec<String>,
}

impl UpstreamSession {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.resolved_at.elapsed() < ttl
    }

    /// Whether the key proxy may fetch `key_url` for this channel
    pub fn allows_key(&self, key_url: &Url) -> bool {
        let origin = key_url.origin().ascii_serialization();
        self.key_origins.iter().any(|allowed| *allowed == origin)
    }

    fn add_key_origin(&mut self, origin: String) {
        if !self.key_origins.contains(&origin) {
            self.key_origins.push(origin);
        }
    }
}

#[derive(Default)]
struct SlotState {
    session: Option<UpstreamSession>,
    last_outcome: Option<UpstreamResult<Arc<MediaPlaylist>>>,
}

/// Single-flight slot: callers queue on `state`, and a caller that observed
/// an older `generation` than the one present once it holds the lock shares
/// the outcome of the resolve it waited on.
#[derive(Default)]
struct ChannelSlot {
    state: tokio::sync::Mutex<SlotState>,
    generation: AtomicU64,
}

pub struct UpstreamResolver {
    client: Arc<dyn OriginClient>,
    base_url: Url,
    landing_page: String,
    index_pattern: String,
    session_ttl: Duration,
    slots: Mutex<HashMap<String, Arc<ChannelSlot>>>,
}

impl UpstreamResolver {
    pub fn new(client: Arc<dyn OriginClient>, config: &UpstreamConfig) -> AppResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            AppError::configuration(format!("Invalid upstream base URL '{}': {e}", config.base_url))
        })?;
        Regex::new(&config.index_pattern.replace("{channel}", "0")).map_err(|e| {
            AppError::configuration(format!("Invalid index playlist pattern: {e}"))
        })?;

        Ok(Self {
            client,
            base_url,
            landing_page: config.landing_page.clone(),
            index_pattern: config.index_pattern.clone(),
            session_ttl: config.session_ttl,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve the channel from scratch and return its rewritten media
    /// playlist. Concurrent calls for the same channel share one resolve.
    pub async fn resolve(&self, channel: &Channel) -> UpstreamResult<MediaPlaylist> {
        let slot = self.slot(&channel.number);
        let observed = slot.generation.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if slot.generation.load(Ordering::Acquire) != observed {
            if let Some(outcome) = &state.last_outcome {
                debug!(channel = %channel.number, "Sharing in-flight resolve");
                return outcome.clone().map(|playlist| playlist.as_ref().clone());
            }
        }

        self.refresh_locked(channel, &slot, &mut state)
            .await
            .map(|playlist| playlist.as_ref().clone())
    }

    /// Cached session for the channel, refreshed when older than the TTL
    pub async fn get_session(&self, channel: &Channel) -> UpstreamResult<UpstreamSession> {
        let slot = self.slot(&channel.number);
        let observed = slot.generation.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if let Some(session) = &state.session {
            if session.is_fresh(self.session_ttl) {
                return Ok(session.clone());
            }
        }

        if slot.generation.load(Ordering::Acquire) != observed {
            if let Some(Err(e)) = &state.last_outcome {
                return Err(e.clone());
            }
        }

        self.refresh_locked(channel, &slot, &mut state).await?;
        state
            .session
            .clone()
            .ok_or_else(|| UpstreamError::parse("session", "resolve produced no session"))
    }

    fn slot(&self, number: &str) -> Arc<ChannelSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(number.to_string()).or_default())
    }

    async fn refresh_locked(
        &self,
        channel: &Channel,
        slot: &ChannelSlot,
        state: &mut SlotState,
    ) -> UpstreamResult<Arc<MediaPlaylist>> {
        let outcome = match self.fetch_playlist(channel).await {
            Ok((playlist, mut session)) => {
                // keys from the previous playlist stay fetchable across a refresh
                if let Some(previous) = state.session.take() {
                    for origin in previous.key_origins {
                        session.add_key_origin(origin);
                    }
                }
                info!(
                    channel = %channel.number,
                    playlist_url = %session.playlist_url,
                    segments = playlist.segments.len(),
                    "Resolved upstream session"
                );
                state.session = Some(session);
                Ok(Arc::new(playlist))
            }
            Err(e) => {
                warn!(channel = %channel.number, error = %e, "Upstream resolve failed");
                Err(e)
            }
        };

        state.last_outcome = Some(outcome.clone());
        slot.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn fetch_playlist(
        &self,
        channel: &Channel,
    ) -> UpstreamResult<(MediaPlaylist, UpstreamSession)> {
        let landing_path = self.landing_page.replace("{channel}", &channel.number);
        let landing_url = self
            .base_url
            .join(&landing_path)
            .map_err(|e| UpstreamError::parse("landing page url", e.to_string()))?;

        let landing = self.client.get_text(&landing_url, None).await?;
        let referer = landing.final_url;
        let index_url = self.find_index_url(&landing.body, &referer, &channel.number)?;
        debug!(channel = %channel.number, index_url = %index_url, "Found index playlist");

        let index = self.client.get_text(&index_url, Some(&referer)).await?;
        let (playlist_url, mut playlist) = match parse_playlist(&index.body, "index playlist")? {
            Playlist::MediaPlaylist(media) => (index.final_url, media),
            Playlist::MasterPlaylist(master) => {
                let variant = master.variants.first().ok_or_else(|| {
                    UpstreamError::parse("index playlist", "no variant stream found")
                })?;
                let variant_url = index
                    .final_url
                    .join(&variant.uri)
                    .map_err(|e| UpstreamError::parse("variant url", e.to_string()))?;

                let media = self.client.get_text(&variant_url, Some(&referer)).await?;
                match parse_playlist(&media.body, "media playlist")? {
                    Playlist::MediaPlaylist(playlist) => (media.final_url, playlist),
                    Playlist::MasterPlaylist(_) => {
                        return Err(UpstreamError::parse(
                            "media playlist",
                            "variant points to another master playlist",
                        ));
                    }
                }
            }
        };

        let key_urls = rewrite_keys(&mut playlist, &playlist_url, &channel.number)?;

        let mut session = UpstreamSession {
            playlist_url,
            referer,
            resolved_at: Instant::now(),
            resolved_at_utc: Utc::now(),
            key_origins: Vec::new(),
        };
        for key_url in &key_urls {
            session.add_key_origin(key_url.origin().ascii_serialization());
        }
        Ok((playlist, session))
    }

    fn find_index_url(&self, body: &str, landing_url: &Url, number: &str) -> UpstreamResult<Url> {
        let pattern = self
            .index_pattern
            .replace("{channel}", &regex::escape(number));
        let regex = Regex::new(&pattern)
            .map_err(|e| UpstreamError::parse("index playlist pattern", e.to_string()))?;

        let captures = regex.captures(body).ok_or_else(|| {
            UpstreamError::parse("landing page", "index playlist url not found")
        })?;
        let found = captures
            .name("url")
            .or_else(|| captures.get(0))
            .map(|m| m.as_str())
            .unwrap_or_default();

        landing_url
            .join(found)
            .map_err(|e| UpstreamError::parse("index playlist url", e.to_string()))
    }
}

fn parse_playlist(body: &str, context: &str) -> UpstreamResult<Playlist> {
    m3u8_rs::parse_playlist_res(body.as_bytes())
        .map_err(|_| UpstreamError::parse(context, "not a valid HLS playlist"))
}

/// Local proxy path for an absolute origin key URL
pub fn key_proxy_path(number: &str, key_url: &Url) -> String {
    format!("/channel/{}/key/{}", number, URL_SAFE.encode(key_url.as_str()))
}

/// Repoint every key URI to the local key proxy. Only the URI changes: each
/// segment keeps its own method, IV and key format. Returns the distinct
/// absolute key URLs that were proxied.
pub fn rewrite_keys(
    playlist: &mut MediaPlaylist,
    playlist_url: &Url,
    number: &str,
) -> UpstreamResult<Vec<Url>> {
    let mut proxied: HashMap<String, String> = HashMap::new();
    let mut key_urls = Vec::new();

    for segment in playlist.segments.iter_mut() {
        let Some(key) = segment.key.as_mut() else {
            continue;
        };
        let Some(uri) = key.uri.take() else {
            continue;
        };

        let path = match proxied.get(&uri) {
            Some(path) => path.clone(),
            None => {
                let absolute = playlist_url
                    .join(&uri)
                    .map_err(|e| UpstreamError::parse("key uri", e.to_string()))?;
                let path = key_proxy_path(number, &absolute);
                proxied.insert(uri, path.clone());
                key_urls.push(absolute);
                path
            }
        };
        key.uri = Some(path);
    }

    Ok(key_urls)
}

/// Serialize a media playlist as an HLS document
pub fn render_playlist(playlist: &MediaPlaylist) -> UpstreamResult<String> {
    let mut buffer = Vec::new();
    playlist
        .write_to(&mut buffer)
        .map_err(|e| UpstreamError::parse("playlist output", e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| UpstreamError::parse("playlist output", e.to_string()))
}
