//! Job-scoped locks
//!
//! Two disciplines live here:
//! - write gates: Persisting and regeneration store writes for one job
//!   are mutually exclusive
//! - path claims: regenerations of one job serialize when their path sets
//!   overlap and run independently when disjoint

use sprout_core::JobId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

struct PathClaim {
    ticket: u64,
    paths: HashSet<String>,
}

#[derive(Default)]
pub struct JobLocks {
    write_gates: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
    claims: Mutex<HashMap<JobId, Vec<PathClaim>>>,
    released: Notify,
    next_ticket: AtomicU64,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutex serializing store writes for one job
    pub fn write_gate(&self, job_id: JobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.write_gates.lock().unwrap();
        gates.entry(job_id).or_default().clone()
    }

    /// Claim `paths` for `job_id`, waiting while any overlapping claim is
    /// held. Disjoint claims proceed immediately.
    pub async fn claim_paths(self: &Arc<Self>, job_id: JobId, paths: &[String]) -> PathClaimGuard {
        let wanted: HashSet<String> = paths.iter().cloned().collect();
        loop {
            // Arm the wakeup before checking, so a release happening
            // between the check and the await is not missed
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            {
                let mut claims = self.claims.lock().unwrap();
                let overlaps = claims
                    .get(&job_id)
                    .map(|held| held.iter().any(|c| !c.paths.is_disjoint(&wanted)))
                    .unwrap_or(false);
                if !overlaps {
                    let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                    claims.entry(job_id).or_default().push(PathClaim {
                        ticket,
                        paths: wanted,
                    });
                    return PathClaimGuard {
                        locks: Arc::clone(self),
                        job_id,
                        ticket,
                    };
                }
            }
            released.await;
        }
    }

    fn release(&self, job_id: JobId, ticket: u64) {
        let mut claims = self.claims.lock().unwrap();
        if let Some(held) = claims.get_mut(&job_id) {
            held.retain(|c| c.ticket != ticket);
            if held.is_empty() {
                claims.remove(&job_id);
            }
        }
        drop(claims);
        self.released.notify_waiters();
    }
}

/// Releases the claimed path set on drop
pub struct PathClaimGuard {
    locks: Arc<JobLocks>,
    job_id: JobId,
    ticket: u64,
}

impl Drop for PathClaimGuard {
    fn drop(&mut self) {
        self.locks.release(self.job_id, self.ticket);
    }
}
