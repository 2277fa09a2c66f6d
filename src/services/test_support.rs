use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::transcode::{ProcessFactory, StreamProcess};
use crate::errors::TranscodeError;
use crate::models::Channel;

#[derive(Default)]
pub struct FakeCounters {
    pub created: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
}

impl FakeCounters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Emits an 8-digit sequence number every `interval`
pub struct FakeProcess {
    counters: Arc<FakeCounters>,
    interval: Duration,
    end_after: Option<u64>,
    fail_start: bool,
    started: bool,
    stopped: bool,
    sequence: u64,
}

#[async_trait]
impl StreamProcess for FakeProcess {
    fn start(&mut self) -> Result<(), TranscodeError> {
        if self.started {
            return Ok(());
        }
        if self.fail_start {
            return Err(TranscodeError::Spawn {
                command: "fake".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            });
        }
        self.started = true;
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>, TranscodeError> {
        if !self.started {
            return Err(TranscodeError::NotStarted);
        }
        if self.stopped || self.end_after.is_some_and(|end| self.sequence >= end) {
            return Ok(None);
        }
        tokio::time::sleep(self.interval).await;
        self.sequence += 1;
        Ok(Some(Bytes::from(format!("{:08}", self.sequence))))
    }

    fn stop(&mut self) {
        if self.started && !self.stopped {
            self.stopped = true;
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_started(&self) -> bool {
        self.started
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct FakeFactory {
    pub counters: Arc<FakeCounters>,
    pub interval: Duration,
    pub end_after: Option<u64>,
    pub fail_start: bool,
}

impl Default for FakeFactory {
    fn default() -> Self {
        Self {
            counters: Arc::new(FakeCounters::default()),
            interval: Duration::from_millis(100),
            end_after: None,
            fail_start: false,
        }
    }
}

impl ProcessFactory for FakeFactory {
    fn create(&self, _channel: &Channel) -> Box<dyn StreamProcess> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeProcess {
            counters: Arc::clone(&self.counters),
            interval: self.interval,
            end_after: self.end_after,
            fail_start: self.fail_start,
            started: false,
            stopped: false,
            sequence: 0,
        })
    }
}

pub fn channel(number: &str) -> Arc<Channel> {
    Arc::new(Channel::new(number, &format!("Channel {number}"), "us", "", ""))
}
