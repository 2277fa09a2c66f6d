//! Tuner pool driving real child processes through `sh`

mod common;

use std::sync::Arc;
use std::time::Duration;
use url::Url;

use hdhr_proxy::config::{TranscodeConfig, TunerConfig};
use hdhr_proxy::errors::TunerError;
use hdhr_proxy::models::Channel;
use hdhr_proxy::services::{TranscodeProcessFactory, TunerPool, TunerState};

const COUNTING_SCRIPT: &str =
    "i=0; while true; do i=$((i+1)); printf '%08d' $i; sleep 0.05; done";

fn pool(transcode: TranscodeConfig, max_tuners: usize, idle_timeout: Duration) -> TunerPool {
    let factory = Arc::new(TranscodeProcessFactory::new(
        transcode,
        Url::parse("http://127.0.0.1:8000/").unwrap(),
    ));
    let config = TunerConfig {
        max_tuners,
        idle_timeout,
    };
    TunerPool::new(&config, factory)
}

fn channel(number: &str) -> Arc<Channel> {
    Arc::new(Channel::new(number, &format!("Channel {number}"), "us", "", ""))
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_listeners_share_one_process() {
    let pool = pool(
        common::shell_transcode(COUNTING_SCRIPT),
        2,
        Duration::from_secs(20),
    );
    let espn = channel("44");

    let mut first = pool.claim_listener(&espn).unwrap();
    let mut second = pool.claim_listener(&espn).unwrap();
    assert!(Arc::ptr_eq(first.tuner(), second.tuner()));
    assert_eq!(pool.live_count(), 1);

    let a = tokio::time::timeout(Duration::from_secs(5), first.recv())
        .await
        .unwrap()
        .unwrap();
    let b = tokio::time::timeout(Duration::from_secs(5), second.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a, b);
    assert!(a.starts_with(b"0000000"));

    pool.shutdown();
}

#[tokio::test]
async fn test_process_exit_ends_stream_and_frees_slot() {
    let pool = pool(
        common::shell_transcode("printf 'LAST-CHUNK'"),
        1,
        Duration::from_secs(20),
    );
    let espn = channel("44");

    let mut listener = pool.claim_listener(&espn).unwrap();
    let mut received = Vec::new();
    while let Some(chunk) = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
    {
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"LAST-CHUNK");
    assert_eq!(listener.tuner().state(), TunerState::Stopped);

    assert!(wait_until(|| pool.get("44").is_none()).await);
    assert_eq!(pool.live_count(), 0);

    // the freed slot is usable by another channel
    let other = pool.claim_listener(&channel("45")).unwrap();
    assert_eq!(other.tuner().channel().number, "45");
    pool.shutdown();
}

#[tokio::test]
async fn test_missing_binary_fails_claim() {
    let transcode = TranscodeConfig {
        command: "/nonexistent/remuxer".to_string(),
        ..common::shell_transcode("true")
    };
    let pool = pool(transcode, 2, Duration::from_secs(20));

    let err = pool.claim_listener(&channel("44")).unwrap_err();
    assert!(matches!(err, TunerError::ProcessSpawn { .. }));
    assert_eq!(pool.live_count(), 0);
    assert!(pool.get("44").is_none());
    assert!(pool.statuses().is_empty());
}

#[tokio::test]
async fn test_idle_tuner_is_torn_down() {
    let pool = pool(
        common::shell_transcode(common::LOOPING_SCRIPT),
        1,
        Duration::from_millis(300),
    );

    let mut listener = pool.claim_listener(&channel("44")).unwrap();
    let chunk = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!chunk.is_empty());

    let tuner = Arc::clone(listener.tuner());
    listener.release();
    assert_eq!(tuner.state(), TunerState::Draining);

    assert!(wait_until(|| tuner.is_stopped()).await);
    assert!(wait_until(|| pool.get("44").is_none()).await);
    assert_eq!(pool.reported_capacity(), 1);
}
