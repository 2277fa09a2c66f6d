//! Bounded registry of live tuners, one per channel

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::transcode::ProcessFactory;
use super::tuner::{Listener, Tuner, TunerStatus};
use crate::config::TunerConfig;
use crate::errors::{TunerError, TunerResult};
use crate::models::Channel;

type TunerMap = HashMap<String, Arc<Tuner>>;

fn lock(tuners: &Mutex<TunerMap>) -> MutexGuard<'_, TunerMap> {
    tuners.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TunerPool {
    max_tuners: usize,
    idle_timeout: Duration,
    factory: Arc<dyn ProcessFactory>,
    tuners: Arc<Mutex<TunerMap>>,
}

impl TunerPool {
    pub fn new(config: &TunerConfig, factory: Arc<dyn ProcessFactory>) -> Self {
        Self {
            max_tuners: config.max_tuners,
            idle_timeout: config.idle_timeout,
            factory,
            tuners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn max_tuners(&self) -> usize {
        self.max_tuners
    }

    /// Return the live tuner for the channel or create one if a slot is free.
    ///
    /// Tuners without listeners are reclaimed first. The returned tuner has no listener
    /// yet; `claim_listener` claims and attaches in one step.
    pub fn claim_tuner(&self, channel: &Arc<Channel>) -> TunerResult<Arc<Tuner>> {
        let (claimed, evicted) = {
            let mut tuners = lock(&self.tuners);
            let evicted = self.evict_locked(&mut tuners);
            (self.claim_locked(&mut tuners, channel), evicted)
        };
        stop_all(evicted);
        claimed
    }

    /// Claim the channel's tuner and attach a listener to it, then start the
    /// process if needed.
    pub fn claim_listener(&self, channel: &Arc<Channel>) -> TunerResult<Listener> {
        let (attached, evicted) = {
            let mut tuners = lock(&self.tuners);
            let evicted = self.evict_locked(&mut tuners);
            let attached = self
                .claim_locked(&mut tuners, channel)
                .and_then(|tuner| tuner.attach());
            (attached, evicted)
        };
        stop_all(evicted);

        let listener = attached?;
        listener.tuner().ensure_started()?;
        Ok(listener)
    }

    /// Remove every tuner without listeners. The caller stops them once the
    /// pool lock is released.
    fn evict_locked(&self, tuners: &mut TunerMap) -> Vec<Arc<Tuner>> {
        let victims: Vec<String> = tuners
            .iter()
            .filter(|(_, tuner)| tuner.is_reclaimable())
            .map(|(number, _)| number.clone())
            .collect();

        victims
            .into_iter()
            .filter_map(|number| {
                debug!(channel = %number, "Reclaiming idle tuner");
                tuners.remove(&number)
            })
            .collect()
    }

    fn claim_locked(&self, tuners: &mut TunerMap, channel: &Arc<Channel>) -> TunerResult<Arc<Tuner>> {
        if let Some(tuner) = tuners.get(&channel.number) {
            debug!(channel = %channel.number, tuner = %tuner.id(), "Sharing existing tuner");
            return Ok(Arc::clone(tuner));
        }

        if tuners.len() >= self.max_tuners {
            warn!(
                channel = %channel.number,
                in_use = tuners.len(),
                max_tuners = self.max_tuners,
                "Tuner pool at capacity"
            );
            return Err(TunerError::NoCapacity {
                channel: channel.number.clone(),
                max_tuners: self.max_tuners,
            });
        }

        let tuner = Tuner::new(Arc::clone(channel), Arc::clone(&self.factory), self.idle_timeout);
        let registry = Arc::downgrade(&self.tuners);
        tuner.on_stopped(move |stopped| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut tuners = lock(&registry);
            let number = &stopped.channel().number;
            if tuners.get(number).is_some_and(|t| t.id() == stopped.id()) {
                tuners.remove(number);
                debug!(channel = %number, "Tuner removed from pool");
            }
        });

        tuners.insert(channel.number.clone(), Arc::clone(&tuner));
        info!(
            channel = %channel.number,
            tuner = %tuner.id(),
            in_use = tuners.len(),
            max_tuners = self.max_tuners,
            "Allocated tuner"
        );
        Ok(tuner)
    }

    /// Tuner count advertised to clients.
    ///
    /// Over-reports once any listener is attached so a client can always try
    /// to join an already running channel.
    pub fn reported_capacity(&self) -> usize {
        let tuners = lock(&self.tuners);
        let live: Vec<&Arc<Tuner>> = tuners.values().filter(|t| !t.is_stopped()).collect();
        let total_listeners: usize = live.iter().map(|t| t.listener_count()).sum();
        let free = self.max_tuners.saturating_sub(live.len());

        if total_listeners == 0 {
            self.max_tuners
        } else {
            total_listeners + free.max(1)
        }
    }

    pub fn live_count(&self) -> usize {
        lock(&self.tuners)
            .values()
            .filter(|t| !t.is_stopped())
            .count()
    }

    pub fn get(&self, number: &str) -> Option<Arc<Tuner>> {
        lock(&self.tuners).get(number).cloned()
    }

    pub fn statuses(&self) -> Vec<TunerStatus> {
        let mut statuses: Vec<TunerStatus> = lock(&self.tuners).values().map(|t| t.status()).collect();
        statuses.sort_by(|a, b| a.channel.cmp(&b.channel));
        statuses
    }

    /// Stop every tuner, used on server shutdown
    pub fn shutdown(&self) {
        let drained: Vec<Arc<Tuner>> = lock(&self.tuners).drain().map(|(_, t)| t).collect();
        if !drained.is_empty() {
            info!(tuners = drained.len(), "Stopping all tuners");
        }
        stop_all(drained);
    }
}

// Stopping runs the removal hook, which takes the pool lock
fn stop_all(tuners: Vec<Arc<Tuner>>) {
    for tuner in tuners {
        tuner.stop();
    }
}
