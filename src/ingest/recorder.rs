//! Fire-and-forget usage-event recorder
//!
//! Hot-path recording must never block a request handler, so events flow
//! through an actor with a 2-layer buffer:
//! - Layer 1: local Vec inside the actor (single-threaded, no locks)
//! - Layer 2: shared DashMap keyed by subject, drained by the flush task
//!
//! GeoIP lookups are deferred until flush time and done in batch, off the
//! hot path. A full channel drops the event with a warning.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::index::UsageIndex;
use crate::ingest::geoip::GeoIpService;
use crate::ingest::ip_extractor::anonymize_ip;
use crate::ingest::models::{GeoLocation, PendingEvent, ViewEvent};

enum ActorMessage {
    Record(PendingEvent),
    /// Shutdown signal - flush all buffered events to Layer 2
    Shutdown,
}

struct RecorderActor {
    receiver: mpsc::Receiver<ActorMessage>,
    buffer: Vec<PendingEvent>,
    shared_buffer: Arc<DashMap<Uuid, Vec<PendingEvent>>>,
    fast_flush_interval: Duration,
}

impl RecorderActor {
    async fn run(mut self) {
        let mut fast_flush_ticker = tokio::time::interval(self.fast_flush_interval);

        // Skip the first tick which fires immediately
        fast_flush_ticker.tick().await;

        loop {
            tokio::select! {
                Some(msg) = self.receiver.recv() => {
                    match msg {
                        ActorMessage::Record(event) => {
                            self.buffer.push(event);
                        }
                        ActorMessage::Shutdown => {
                            info!("Event recorder received shutdown signal, flushing...");
                            self.flush_buffer_to_shared();
                            break;
                        }
                    }
                }
                _ = fast_flush_ticker.tick() => {
                    self.flush_buffer_to_shared();
                }
                else => {
                    warn!("Event recorder channel closed unexpectedly, flushing...");
                    self.flush_buffer_to_shared();
                    break;
                }
            }
        }
    }

    /// Flush Layer 1 (local buffer) → Layer 2 (shared DashMap)
    fn flush_buffer_to_shared(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        for event in self.buffer.drain(..) {
            self.shared_buffer
                .entry(event.subject_id)
                .or_default()
                .push(event);
        }
    }
}

/// Buffers raw view/download occurrences and flushes them to the usage index.
pub struct EventRecorder {
    actor_tx: mpsc::Sender<ActorMessage>,
    shared_buffer: Arc<DashMap<Uuid, Vec<PendingEvent>>>,
    shutdown: Arc<Mutex<bool>>,
}

impl EventRecorder {
    pub fn new_with_config(buffer_size: usize, fast_flush_interval_ms: u64) -> Self {
        let (actor_tx, actor_rx) = mpsc::channel(buffer_size);
        let shared_buffer = Arc::new(DashMap::new());

        let actor = RecorderActor {
            receiver: actor_rx,
            buffer: Vec::new(),
            shared_buffer: Arc::clone(&shared_buffer),
            fast_flush_interval: Duration::from_millis(fast_flush_interval_ms),
        };

        tokio::spawn(async move {
            actor.run().await;
        });

        Self {
            actor_tx,
            shared_buffer,
            shutdown: Arc::new(Mutex::new(false)),
        }
    }

    pub fn new() -> Self {
        Self::new_with_config(
            100_000, // 100k event buffer
            100,     // 100ms fast flush interval
        )
    }

    /// Record a view/download occurrence (HOT PATH).
    ///
    /// Non-blocking; if the channel is full the event is dropped with a
    /// warning rather than stalling the caller.
    pub fn record_event(&self, event: PendingEvent) {
        if self
            .actor_tx
            .try_send(ActorMessage::Record(event))
            .is_err()
        {
            warn!("Usage event buffer full, dropping event");
        }
    }

    /// Drain Layer 2 and return all pending events (used by the flush task
    /// and by tests that flush synchronously).
    pub fn drain_pending(&self) -> Vec<PendingEvent> {
        let mut result = Vec::new();

        let keys: Vec<Uuid> = self
            .shared_buffer
            .iter()
            .map(|entry| *entry.key())
            .collect();

        for key in keys {
            if let Some((_, mut events)) = self.shared_buffer.remove(&key) {
                result.append(&mut events);
            }
        }

        result
    }

    /// Start the background flush task.
    ///
    /// Periodically drains pending events, performs GeoIP lookups in batch,
    /// and writes the resolved events to the usage index.
    pub fn start_flush_task(
        &self,
        flush_interval_secs: u64,
        geoip: Option<Arc<GeoIpService>>,
        anonymize_ips: bool,
        index: Arc<dyn UsageIndex>,
    ) -> tokio::task::JoinHandle<()> {
        let shared_buffer = Arc::clone(&self.shared_buffer);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(flush_interval_secs));

            loop {
                interval.tick().await;

                if *shutdown.lock().await {
                    info!("Event recorder flush task shutting down");
                    break;
                }

                let buffered = shared_buffer.len();
                if buffered == 0 {
                    continue;
                }
                debug!("Flushing {} subject event buffers", buffered);

                let keys: Vec<Uuid> = shared_buffer.iter().map(|entry| *entry.key()).collect();

                let mut batch = Vec::new();
                for key in keys {
                    if let Some((_, events)) = shared_buffer.remove(&key) {
                        for event in events {
                            batch.push(resolve_event(event, geoip.as_deref(), anonymize_ips));
                        }
                    }
                }

                if !batch.is_empty() {
                    if let Err(e) = index.record_batch(batch).await {
                        error!("Failed to flush usage events to index: {e:#}");
                    }
                }
            }
        })
    }

    /// Signal shutdown to the flush task and actor
    pub async fn shutdown(&self) {
        let _ = self.actor_tx.send(ActorMessage::Shutdown).await;

        let mut shutdown = self.shutdown.lock().await;
        *shutdown = true;
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a pending event into a storable one: GeoIP lookup (if a service
/// is available) and optional IP anonymization.
pub fn resolve_event(
    event: PendingEvent,
    geoip: Option<&GeoIpService>,
    anonymize_ips: bool,
) -> ViewEvent {
    let geo = match (geoip, event.client_ip) {
        (Some(service), Some(ip)) => service.lookup(ip),
        (None, Some(ip)) => GeoLocation {
            ip_version: if ip.is_ipv4() { 4 } else { 6 },
            ..Default::default()
        },
        _ => GeoLocation::default(),
    };

    let client_ip = event.client_ip.map(|ip| {
        if anonymize_ips {
            anonymize_ip(ip)
        } else {
            ip
        }
    });

    ViewEvent {
        subject_type: event.subject_type,
        subject_id: event.subject_id,
        timestamp: event.timestamp,
        geo,
        client_ip,
        is_download: event.is_download,
    }
}
