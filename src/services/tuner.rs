//! Per-channel broadcast multiplexer
//!
//! A [`Tuner`] owns at most one stream process and fans every chunk it reads
//! out to a dynamic set of [`Listener`]s. Each listener has its own unbounded
//! queue, so a slow consumer only grows its own backlog and never stalls the
//! pump or the other listeners.
//!
//! Lifecycle: `Created` until the first listener starts the process, `Active`
//! while listeners are attached, `Draining` while running without listeners,
//! `Stopped` once the idle window elapses, the process ends or `stop()` is
//! called.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::transcode::{ProcessFactory, StreamProcess};
use crate::errors::{TunerError, TunerResult};
use crate::models::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunerState {
    Created,
    Active,
    Draining,
    Stopped,
}

/// Point-in-time view of a tuner, exposed on `/tuners`
#[derive(Debug, Clone, Serialize)]
pub struct TunerStatus {
    pub id: Uuid,
    pub channel: String,
    pub channel_name: String,
    pub state: TunerState,
    pub listeners: usize,
    pub created_at: DateTime<Utc>,
    pub idle_seconds: Option<u64>,
}

type StoppedHook = Box<dyn FnOnce(&Tuner) + Send>;

enum Lifecycle {
    Created,
    Running(JoinHandle<()>),
    Stopped,
}

#[derive(Default)]
struct Listeners {
    senders: HashMap<Uuid, UnboundedSender<Bytes>>,
    idle_since: Option<Instant>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Tuner {
    id: Uuid,
    channel: Arc<Channel>,
    factory: Arc<dyn ProcessFactory>,
    idle_timeout: Duration,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    // Lock order: lifecycle before listeners
    lifecycle: Mutex<Lifecycle>,
    listeners: Mutex<Listeners>,
    on_stopped: Mutex<Option<StoppedHook>>,
}

impl Tuner {
    pub fn new(
        channel: Arc<Channel>,
        factory: Arc<dyn ProcessFactory>,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            channel,
            factory,
            idle_timeout,
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
            lifecycle: Mutex::new(Lifecycle::Created),
            listeners: Mutex::new(Listeners::default()),
            on_stopped: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Register a callback run once when the tuner stops
    pub fn on_stopped<F>(&self, hook: F)
    where
        F: FnOnce(&Tuner) + Send + 'static,
    {
        *lock(&self.on_stopped) = Some(Box::new(hook));
    }

    /// Attach a new listener and make sure the process is running.
    ///
    /// The listener is registered before the process starts so it cannot
    /// miss the first chunks.
    pub fn get_listener(self: &Arc<Self>) -> TunerResult<Listener> {
        let listener = self.attach()?;
        self.ensure_started()?;
        Ok(listener)
    }

    /// Register a listener without starting the process
    pub fn attach(self: &Arc<Self>) -> TunerResult<Listener> {
        let lifecycle = lock(&self.lifecycle);
        if matches!(*lifecycle, Lifecycle::Stopped) {
            return Err(self.stopped_error());
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let count = {
            let mut listeners = lock(&self.listeners);
            listeners.senders.insert(id, sender);
            listeners.idle_since = None;
            listeners.senders.len()
        };
        drop(lifecycle);

        debug!(channel = %self.channel.number, listener = %id, listeners = count, "Listener attached");
        Ok(Listener {
            id,
            receiver,
            tuner: Arc::clone(self),
        })
    }

    /// Start the process and pump task if not already running
    pub fn ensure_started(self: &Arc<Self>) -> TunerResult<()> {
        let mut lifecycle = lock(&self.lifecycle);
        match *lifecycle {
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::Stopped => return Err(self.stopped_error()),
            Lifecycle::Created => {}
        }

        let mut process = self.factory.create(&self.channel);
        if let Err(e) = process.start() {
            drop(lifecycle);
            error!(channel = %self.channel.number, error = %e, "Failed to start stream process");
            self.stop();
            return Err(TunerError::ProcessSpawn {
                channel: self.channel.number.clone(),
                message: e.to_string(),
            });
        }

        let handle = tokio::spawn(Arc::clone(self).pump(process));
        *lifecycle = Lifecycle::Running(handle);
        info!(channel = %self.channel.number, tuner = %self.id, "Tuner active");
        Ok(())
    }

    async fn pump(self: Arc<Self>, mut process: Box<dyn StreamProcess>) {
        loop {
            match process.read_chunk().await {
                Ok(Some(chunk)) => {
                    if let Some(idle) = self.broadcast(chunk) {
                        if idle > self.idle_timeout {
                            info!(
                                channel = %self.channel.number,
                                idle_secs = idle.as_secs(),
                                "Tuner idle, tearing down"
                            );
                            break;
                        }
                    }
                }
                Ok(None) => {
                    info!(channel = %self.channel.number, "Stream process ended");
                    break;
                }
                Err(e) => {
                    warn!(channel = %self.channel.number, error = %e, "Stream process failed");
                    break;
                }
            }
        }

        process.stop();
        self.stop();
    }

    /// Push a chunk to every listener. Returns how long the tuner has been
    /// without listeners, `None` while at least one is attached.
    fn broadcast(&self, chunk: Bytes) -> Option<Duration> {
        let mut listeners = lock(&self.listeners);
        listeners
            .senders
            .retain(|_, sender| sender.send(chunk.clone()).is_ok());

        if listeners.senders.is_empty() {
            let since = *listeners.idle_since.get_or_insert_with(Instant::now);
            Some(since.elapsed())
        } else {
            listeners.idle_since = None;
            None
        }
    }

    fn release_listener(&self, id: Uuid) {
        let mut listeners = lock(&self.listeners);
        if listeners.senders.remove(&id).is_some() {
            debug!(
                channel = %self.channel.number,
                listener = %id,
                listeners = listeners.senders.len(),
                "Listener released"
            );
            if listeners.senders.is_empty() {
                listeners.idle_since = Some(Instant::now());
            }
        }
    }

    /// Cancel the pump, kill the process and close every listener.
    /// Idempotent.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *lock(&self.lifecycle), Lifecycle::Stopped);
        match previous {
            Lifecycle::Stopped => return,
            // Dropping the pump future drops and kills the process
            Lifecycle::Running(handle) => handle.abort(),
            Lifecycle::Created => {}
        }

        let closed = {
            let mut listeners = lock(&self.listeners);
            listeners.idle_since = None;
            std::mem::take(&mut listeners.senders)
        };
        info!(
            channel = %self.channel.number,
            tuner = %self.id,
            listeners = closed.len(),
            "Tuner stopped"
        );
        drop(closed);

        let hook = lock(&self.on_stopped).take();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    pub fn state(&self) -> TunerState {
        let lifecycle = lock(&self.lifecycle);
        match *lifecycle {
            Lifecycle::Created => TunerState::Created,
            Lifecycle::Stopped => TunerState::Stopped,
            Lifecycle::Running(_) => {
                if lock(&self.listeners).senders.is_empty() {
                    TunerState::Draining
                } else {
                    TunerState::Active
                }
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == TunerState::Stopped
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).senders.len()
    }

    /// Time spent without listeners
    pub fn idle_for(&self) -> Option<Duration> {
        let listeners = lock(&self.listeners);
        if !listeners.senders.is_empty() {
            return None;
        }
        Some(
            listeners
                .idle_since
                .map(|since| since.elapsed())
                .unwrap_or_else(|| self.created_at.elapsed()),
        )
    }

    /// Whether the pool may reclaim this tuner's slot: stopped, or without
    /// listeners regardless of how long it has been idle
    pub fn is_reclaimable(&self) -> bool {
        self.is_stopped() || self.listener_count() == 0
    }

    pub fn status(&self) -> TunerStatus {
        TunerStatus {
            id: self.id,
            channel: self.channel.number.clone(),
            channel_name: self.channel.name.clone(),
            state: self.state(),
            listeners: self.listener_count(),
            created_at: self.created_at_utc,
            idle_seconds: self.idle_for().map(|idle| idle.as_secs()),
        }
    }

    fn stopped_error(&self) -> TunerError {
        TunerError::Stopped {
            channel: self.channel.number.clone(),
        }
    }
}

impl std::fmt::Debug for Tuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tuner")
            .field("id", &self.id)
            .field("channel", &self.channel.number)
            .field("state", &self.state())
            .finish()
    }
}

/// One downstream subscription to a tuner's output
///
/// Yields chunks until the tuner stops. Dropping the listener deregisters it.
pub struct Listener {
    id: Uuid,
    receiver: UnboundedReceiver<Bytes>,
    tuner: Arc<Tuner>,
}

impl Listener {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tuner(&self) -> &Arc<Tuner> {
        &self.tuner
    }

    /// Next chunk, `None` once the tuner has stopped and the backlog is drained
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Number of chunks queued but not yet consumed
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }

    pub fn release(self) {}
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("tuner", &self.tuner.id)
            .field("backlog", &self.receiver.len())
            .finish()
    }
}

impl Stream for Listener {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.tuner.release_listener(self.id);
    }
}
