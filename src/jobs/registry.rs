// src/jobs/registry.rs
//! Process-wide registry of in-flight jobs plus the publish/subscribe
//! channel that streams progress to observers. Not a durable log: with no
//! subscriber attached, events are dropped, and a late subscriber sees the
//! job's latest known status as a synthetic replay, then only future events.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::model::StatusEvent;

const CHANNEL_CAPACITY: usize = 256;

struct JobEntry {
    latest: StatusEvent,
    tx: broadcast::Sender<StatusEvent>,
    updated: Instant,
}

pub struct JobRegistry {
    jobs: DashMap<Uuid, JobEntry>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            retention,
        }
    }

    /// Register a job with its initial event. The event is also fanned out
    /// in case an observer raced ahead of creation.
    pub fn create(&self, event: StatusEvent) {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let _ = tx.send(event.clone());
        self.jobs.insert(
            event.job_id,
            JobEntry {
                latest: event,
                tx,
                updated: Instant::now(),
            },
        );
    }

    /// Publish a status event. Terminal states are immutable: anything
    /// arriving after completed/failed is dropped, keeping transitions
    /// monotonic.
    pub fn publish(&self, event: StatusEvent) {
        let Some(mut entry) = self.jobs.get_mut(&event.job_id) else {
            debug!(job_id = %event.job_id, "publish for unknown job dropped");
            return;
        };
        if entry.latest.status.is_terminal() {
            debug!(job_id = %event.job_id, "publish after terminal status dropped");
            return;
        }
        entry.latest = event.clone();
        entry.updated = Instant::now();
        // No subscribers is fine; this is fan-out, not a log.
        let _ = entry.tx.send(event);
    }

    /// Latest status plus a live receiver. The caller replays the first
    /// element before draining the receiver so observers never see silence.
    pub fn subscribe(&self, job_id: Uuid) -> Option<(StatusEvent, broadcast::Receiver<StatusEvent>)> {
        self.jobs
            .get(&job_id)
            .map(|entry| (entry.latest.clone(), entry.tx.subscribe()))
    }

    /// Forget a job that never ran (e.g. its trigger was coalesced away).
    pub fn remove(&self, job_id: Uuid) {
        self.jobs.remove(&job_id);
    }

    pub fn latest(&self, job_id: Uuid) -> Option<StatusEvent> {
        self.jobs.get(&job_id).map(|e| e.latest.clone())
    }

    /// Snapshot of every tracked job, the polling fallback for observers
    /// that cannot hold a stream open.
    pub fn snapshot(&self) -> Vec<StatusEvent> {
        self.jobs.iter().map(|e| e.latest.clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|e| !e.latest.status.is_terminal())
            .count()
    }

    /// Drop terminal entries older than the retention window. Called
    /// opportunistically after jobs finish; there is no background reaper.
    pub fn sweep(&self) {
        let retention = self.retention;
        self.jobs
            .retain(|_, entry| !(entry.latest.status.is_terminal() && entry.updated.elapsed() > retention));
    }
}
