//! Resolver, segment and key fetching against a local HTTP origin through the
//! real reqwest client.

mod common;

use axum::{
    Router,
    extract::Path,
    http::{HeaderMap, StatusCode, header},
    response::{Html, Redirect},
    routing::get,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use hdhr_proxy::config::UpstreamConfig;
use hdhr_proxy::errors::UpstreamError;
use hdhr_proxy::models::Channel;
use hdhr_proxy::upstream::{
    HttpOriginClient, KeyFetcher, OriginClient, SegmentFetcher, UpstreamResolver, render_playlist,
};

const LANDING: &str = r#"<html><script>
    player.setup({ file: "/hls/44/index.m3u8" });
</script></html>"#;

const INDEX: &str = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=2500000\nmono.m3u8\n";

const MEDIA: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:10\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"/keys/44.key\"\n\
#EXTINF:4.0,\nseg-10.ts\n#EXTINF:4.0,\nseg-11.ts\n";

/// The origin only serves media to requests that look like they come from
/// the landing page.
fn check_referer(headers: &HeaderMap) -> Result<(), StatusCode> {
    let referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if referer.ends_with("/embed/44.php") && headers.contains_key(header::ORIGIN) {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

async fn spawn_origin() -> Url {
    let app = Router::new()
        .route(
            "/stream/stream-44.php",
            get(|| async { Redirect::temporary("/embed/44.php") }),
        )
        .route("/embed/44.php", get(|| async { Html(LANDING) }))
        .route(
            "/hls/44/index.m3u8",
            get(|headers: HeaderMap| async move { check_referer(&headers).map(|_| INDEX) }),
        )
        .route(
            "/hls/44/mono.m3u8",
            get(|headers: HeaderMap| async move { check_referer(&headers).map(|_| MEDIA) }),
        )
        .route(
            "/hls/44/seg-10.ts",
            get(|headers: HeaderMap| async move {
                check_referer(&headers).map(|_| "segment-ten-bytes")
            }),
        )
        .route(
            "/keys/44.key",
            get(|headers: HeaderMap| async move {
                check_referer(&headers).map(|_| "fedcba9876543210")
            }),
        )
        .route(
            "/stream/stream-77.php",
            get(|| async { Redirect::temporary("/hop/1") }),
        )
        .route(
            "/hop/{n}",
            get(|Path(n): Path<u32>| async move { Redirect::temporary(&format!("/hop/{}", n + 1)) }),
        )
        .route(
            "/stream/stream-78.php",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Html(LANDING)
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

fn upstream_config(base: &Url) -> UpstreamConfig {
    let mut config = common::test_config(2).upstream;
    config.base_url = base.to_string();
    config.request_timeout = Duration::from_millis(500);
    config
}

struct Origin {
    base: Url,
    resolver: Arc<UpstreamResolver>,
    segments: SegmentFetcher,
    keys: KeyFetcher,
}

async fn origin() -> Origin {
    let base = spawn_origin().await;
    let config = upstream_config(&base);
    let client: Arc<dyn OriginClient> = Arc::new(HttpOriginClient::new(&config).unwrap());
    let resolver = Arc::new(UpstreamResolver::new(Arc::clone(&client), &config).unwrap());
    Origin {
        base,
        segments: SegmentFetcher::new(Arc::clone(&client), Arc::clone(&resolver)),
        keys: KeyFetcher::new(client, Arc::clone(&resolver)),
        resolver,
    }
}

fn channel(number: &str) -> Channel {
    Channel::new(number, &format!("Channel {number}"), "us", "", "")
}

#[tokio::test]
async fn test_resolve_follows_redirected_landing_page() {
    let origin = origin().await;
    let espn = channel("44");

    let playlist = origin.resolver.resolve(&espn).await.unwrap();
    assert_eq!(playlist.media_sequence, 10);
    assert_eq!(playlist.segments.len(), 2);

    let session = origin.resolver.get_session(&espn).await.unwrap();
    assert_eq!(session.referer, origin.base.join("/embed/44.php").unwrap());
    assert_eq!(
        session.playlist_url,
        origin.base.join("/hls/44/mono.m3u8").unwrap()
    );

    let rendered = render_playlist(&playlist).unwrap();
    assert!(rendered.contains("URI=\"/channel/44/key/"));
    assert!(rendered.contains("seg-10.ts"));
}

#[tokio::test]
async fn test_segment_and_key_carry_referer() {
    let origin = origin().await;
    let espn = channel("44");

    let stream = origin.segments.stream_segment(&espn, "seg-10.ts").await.unwrap();
    let body: Vec<u8> = stream
        .map(|chunk| chunk.unwrap().to_vec())
        .concat()
        .await;
    assert_eq!(body, b"segment-ten-bytes");

    let playlist = origin.resolver.resolve(&espn).await.unwrap();
    let key_uri = playlist.segments[0]
        .key
        .as_ref()
        .and_then(|key| key.uri.clone())
        .unwrap();
    let encoded = key_uri.strip_prefix("/channel/44/key/").unwrap();

    let key = origin.keys.fetch_key(&espn, encoded).await.unwrap();
    assert_eq!(&key[..], b"fedcba9876543210");
}

#[tokio::test]
async fn test_missing_segment_reports_status() {
    let origin = origin().await;
    let espn = channel("44");

    let err = match origin.segments.stream_segment(&espn, "seg-99.ts").await {
        Ok(_) => panic!("missing segment streamed"),
        Err(e) => e,
    };
    assert!(matches!(err, UpstreamError::Unavailable { status: Some(404), .. }));
}

#[tokio::test]
async fn test_unknown_landing_page_is_unavailable() {
    let origin = origin().await;

    let err = origin.resolver.resolve(&channel("45")).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Unavailable { status: Some(404), .. }));
}

#[tokio::test]
async fn test_redirect_chain_is_limited() {
    let origin = origin().await;

    let err = origin.resolver.resolve(&channel("77")).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Unavailable { status: None, .. }));
}

#[tokio::test]
async fn test_stalled_origin_times_out() {
    let origin = origin().await;

    let started = std::time::Instant::now();
    let err = origin.resolver.resolve(&channel("78")).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(3));
    match err {
        UpstreamError::Unavailable { message, .. } => assert_eq!(message, "request timed out"),
        other => panic!("unexpected error: {other:?}"),
    }
}
