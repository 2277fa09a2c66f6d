#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

use hdhr_proxy::config::{Config, TranscodeConfig};
use hdhr_proxy::errors::{UpstreamError, UpstreamResult};
use hdhr_proxy::upstream::{ByteStream, OriginClient, OriginResponse};

pub const ORIGIN: &str = "https://origin.test/";
pub const KEY_URL: &str = "https://keys.origin.test/live/44.key";

pub const LANDING_44: &str = r##"<html><body><script>
    var player = new Clappr.Player({ source: "https://cdn.origin.test/hls/44/index.m3u8", parentId: "#player" });
</script></body></html>"##;

pub const INDEX_44: &str = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1920x1080\nmono.m3u8\n";

pub const MEDIA_44: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:2000\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.origin.test/live/44.key\"\n\
#EXTINF:4.004,\nseg-2000.ts\n#EXTINF:4.004,\nseg-2001.ts\n";

/// In-memory origin keyed by absolute URL, recording the referer of every
/// request
#[derive(Default)]
pub struct FakeOrigin {
    pages: HashMap<String, Bytes>,
    pub requests: AtomicUsize,
    pub referers: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeOrigin {
    pub fn with_channel_44() -> Self {
        let mut origin = Self::default();
        origin.insert("https://origin.test/stream/stream-44.php", LANDING_44);
        origin.insert("https://cdn.origin.test/hls/44/index.m3u8", INDEX_44);
        origin.insert("https://cdn.origin.test/hls/44/mono.m3u8", MEDIA_44);
        origin.insert("https://cdn.origin.test/hls/44/seg-2000.ts", "segment-2000-bytes");
        origin.insert(KEY_URL, "0123456789abcdef");
        origin
    }

    pub fn insert(&mut self, url: &str, body: impl Into<Bytes>) {
        self.pages.insert(url.to_string(), body.into());
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn referer_for(&self, url: &str) -> Option<String> {
        self.referers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u == url)
            .and_then(|(_, r)| r.clone())
    }

    fn lookup(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<Bytes> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.referers
            .lock()
            .unwrap()
            .push((url.to_string(), referer.map(|r| r.to_string())));
        self.pages.get(url.as_str()).cloned().ok_or_else(|| UpstreamError::Unavailable {
            url: url.to_string(),
            status: Some(404),
            message: "HTTP 404 Not Found".to_string(),
        })
    }
}

#[async_trait]
impl OriginClient for FakeOrigin {
    async fn get_text(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<OriginResponse> {
        let body = self.lookup(url, referer)?;
        Ok(OriginResponse {
            final_url: url.clone(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    async fn get_bytes(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<Bytes> {
        self.lookup(url, referer)
    }

    async fn get_stream(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<ByteStream> {
        let body = self.lookup(url, referer)?;
        let middle = body.len() / 2;
        let chunks = vec![Ok(body.slice(..middle)), Ok(body.slice(middle..))];
        Ok(stream::iter(chunks).boxed())
    }
}

/// Remuxer stand-in: a shell loop writing a marker every 50ms
pub fn shell_transcode(script: &str) -> TranscodeConfig {
    TranscodeConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "{input}".to_string()],
        chunk_size: 512,
        debug: false,
    }
}

pub const LOOPING_SCRIPT: &str = "while true; do printf 'TS-PACKET'; sleep 0.05; done";

pub fn test_config(max_tuners: usize) -> Config {
    let mut config = Config::default();
    config.upstream.base_url = ORIGIN.to_string();
    config.tuner.max_tuners = max_tuners;
    config.transcode = shell_transcode(LOOPING_SCRIPT);
    config
}
