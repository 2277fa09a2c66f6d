use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::client::{ByteStream, OriginClient};
use super::resolver::UpstreamResolver;
use crate::errors::{UpstreamError, UpstreamResult};
use crate::models::Channel;

/// Pass-through streaming of media segments from the origin
pub struct SegmentFetcher {
    client: Arc<dyn OriginClient>,
    resolver: Arc<UpstreamResolver>,
}

impl SegmentFetcher {
    pub fn new(client: Arc<dyn OriginClient>, resolver: Arc<UpstreamResolver>) -> Self {
        Self { client, resolver }
    }

    /// Stream `relative_path` resolved against the channel's media playlist.
    /// Chunks are forwarded as they arrive; a network error ends the stream
    /// with an error.
    pub async fn stream_segment(
        &self,
        channel: &Channel,
        relative_path: &str,
    ) -> UpstreamResult<ByteStream> {
        let session = self.resolver.get_session(channel).await?;
        let url = session
            .playlist_url
            .join(relative_path)
            .map_err(|e| UpstreamError::parse("segment url", e.to_string()))?;

        debug!(channel = %channel.number, url = %url, "Streaming segment");
        self.client.get_stream(&url, Some(&session.referer)).await
    }
}

/// Fetches encryption keys referenced through the local key proxy path
pub struct KeyFetcher {
    client: Arc<dyn OriginClient>,
    resolver: Arc<UpstreamResolver>,
}

impl KeyFetcher {
    pub fn new(client: Arc<dyn OriginClient>, resolver: Arc<UpstreamResolver>) -> Self {
        Self { client, resolver }
    }

    pub async fn fetch_key(&self, channel: &Channel, encoded: &str) -> UpstreamResult<Bytes> {
        let key_url = decode_key_path(encoded)?;
        let session = self.resolver.get_session(channel).await?;
        if !session.allows_key(&key_url) {
            warn!(channel = %channel.number, url = %key_url, "Key host not referenced by channel playlist");
            return Err(UpstreamError::InvalidKeyPath {
                path: encoded.to_string(),
            });
        }

        debug!(channel = %channel.number, url = %key_url, "Fetching key");
        self.client.get_bytes(&key_url, Some(&session.referer)).await
    }
}

/// Recover the absolute origin key URL from its base64url proxy segment
pub fn decode_key_path(encoded: &str) -> UpstreamResult<Url> {
    let invalid = || UpstreamError::InvalidKeyPath {
        path: encoded.to_string(),
    };

    let raw = URL_SAFE
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .map_err(|_| invalid())?;
    let text = String::from_utf8(raw).map_err(|_| invalid())?;
    let url = Url::parse(&text).map_err(|_| invalid())?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(invalid()),
    }
}
