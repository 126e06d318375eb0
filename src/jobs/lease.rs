// src/jobs/lease.rs
//! Per-source exclusivity leases.
//!
//! A fetch holds its source's lease for the lifetime of the job and renews
//! it periodically. If renewal stops (crash, stuck task), the lease expires
//! and a new fetch is admitted even though the previous job never reached a
//! terminal state. That is a deliberate availability-over-strict-mutual-
//! exclusion tradeoff: a wedged job must not block a source forever.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Lease {
    job_id: Uuid,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// Another job holds a live lease; its id supports coalescing.
    Held { job_id: Uuid },
}

pub struct SourceLeases {
    leases: DashMap<Uuid, Lease>,
    ttl: Duration,
}

impl SourceLeases {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: DashMap::new(),
            ttl,
        }
    }

    /// Atomic acquire-if-absent-or-expired, else read the owner.
    pub fn acquire(&self, source_id: Uuid, job_id: Uuid) -> AcquireOutcome {
        let now = Instant::now();
        match self.leases.entry(source_id) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                if current.expires_at > now {
                    AcquireOutcome::Held {
                        job_id: current.job_id,
                    }
                } else {
                    entry.insert(Lease {
                        job_id,
                        expires_at: now + self.ttl,
                    });
                    AcquireOutcome::Acquired
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Lease {
                    job_id,
                    expires_at: now + self.ttl,
                });
                AcquireOutcome::Acquired
            }
        }
    }

    /// Atomic renew-if-still-owner. False means the lease was lost.
    pub fn renew(&self, source_id: Uuid, job_id: Uuid) -> bool {
        match self.leases.get_mut(&source_id) {
            Some(mut entry) if entry.job_id == job_id => {
                entry.expires_at = Instant::now() + self.ttl;
                true
            }
            _ => false,
        }
    }

    /// Release only when still the owner; an expired-and-reacquired lease
    /// belongs to someone else.
    pub fn release(&self, source_id: Uuid, job_id: Uuid) {
        self.leases
            .remove_if(&source_id, |_, lease| lease.job_id == job_id);
    }

    /// Current live holder, if any.
    pub fn holder(&self, source_id: Uuid) -> Option<Uuid> {
        self.leases
            .get(&source_id)
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_reports_holder() {
        let leases = SourceLeases::new(Duration::from_secs(60));
        let source = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(leases.acquire(source, first), AcquireOutcome::Acquired);
        assert_eq!(
            leases.acquire(source, second),
            AcquireOutcome::Held { job_id: first }
        );
    }

    #[test]
    fn expired_lease_admits_a_new_job() {
        let leases = SourceLeases::new(Duration::from_millis(10));
        let source = Uuid::new_v4();
        let first = Uuid::new_v4();
        assert_eq!(leases.acquire(source, first), AcquireOutcome::Acquired);

        std::thread::sleep(Duration::from_millis(20));
        let second = Uuid::new_v4();
        assert_eq!(leases.acquire(source, second), AcquireOutcome::Acquired);
        // The crashed job can no longer renew.
        assert!(!leases.renew(source, first));
        assert!(leases.renew(source, second));
    }

    #[test]
    fn release_is_owner_scoped() {
        let leases = SourceLeases::new(Duration::from_secs(60));
        let source = Uuid::new_v4();
        let owner = Uuid::new_v4();
        leases.acquire(source, owner);

        leases.release(source, Uuid::new_v4());
        assert_eq!(leases.holder(source), Some(owner));

        leases.release(source, owner);
        assert_eq!(leases.holder(source), None);
    }
}
