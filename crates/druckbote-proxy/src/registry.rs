// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory registry of remote jobs queued for relaying.
//
// The event loop inserts and updates records; the relay worker claims,
// finishes, and reaps them. Records are keyed by the remote job id, the
// map lock is never held across an await, and wake-ups are posted only
// after the lock has been released.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use druckbote_core::types::{LocalJobState, ProxyJob, RemoteJobState};

/// Shared job table plus the wake-up and shutdown primitives layered on
/// top of it.
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<i32, ProxyJob>>,
    work: Notify,
    done: AtomicBool,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            work: Notify::new(),
            done: AtomicBool::new(false),
        }
    }

    /// Queue a newly fetchable remote job. Returns `false` when the job
    /// is already tracked; duplicates are never created.
    pub fn insert_if_absent(&self, remote_job_id: i32, remote_state: RemoteJobState) -> bool {
        let inserted = {
            let mut jobs = self.jobs.write().expect("job registry poisoned");
            if jobs.contains_key(&remote_job_id) {
                false
            } else {
                jobs.insert(remote_job_id, ProxyJob::new(remote_job_id, remote_state));
                true
            }
        };
        if inserted {
            self.wake();
        }
        inserted
    }

    /// Mirror a remote job-state change. Unknown ids are ignored; the job
    /// was never fetchable for this device.
    pub fn update_remote_state(&self, remote_job_id: i32, remote_state: RemoteJobState) -> bool {
        let updated = {
            let mut jobs = self.jobs.write().expect("job registry poisoned");
            match jobs.get_mut(&remote_job_id) {
                Some(job) => {
                    job.remote_job_state = remote_state;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.wake();
        }
        updated
    }

    /// Claim the first record still pending locally whose remote job has
    /// not gone terminal. The claim moves the record to `Fetching`, so a
    /// second scan can never pick the same job.
    pub fn claim_next_pending(&self) -> Option<ProxyJob> {
        let mut jobs = self.jobs.write().expect("job registry poisoned");
        for job in jobs.values_mut() {
            if job.local_job_state == LocalJobState::Pending
                && job.remote_job_state < RemoteJobState::CANCELED
            {
                job.local_job_state = LocalJobState::Fetching;
                return Some(*job);
            }
        }
        None
    }

    /// Drop every record whose remote job has gone terminal and that the
    /// relay worker is not currently working on. Returns how many were
    /// removed.
    pub fn remove_if_terminal(&self) -> usize {
        let mut jobs = self.jobs.write().expect("job registry poisoned");
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.remote_job_state.is_terminal()
                && !matches!(
                    job.local_job_state,
                    LocalJobState::Fetching | LocalJobState::Processing
                ))
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, "purged terminal jobs from the registry");
        }
        removed
    }

    /// Advance a job's local state. Once a terminal state is recorded it
    /// is never overwritten, so late status writes cannot regress a job.
    pub fn set_local_state(&self, remote_job_id: i32, state: LocalJobState) {
        let mut jobs = self.jobs.write().expect("job registry poisoned");
        if let Some(job) = jobs.get_mut(&remote_job_id)
            && !job.local_job_state.is_terminal()
        {
            job.local_job_state = state;
        }
    }

    /// Record the job id assigned by the local IPP device.
    pub fn set_local_job_id(&self, remote_job_id: i32, local_job_id: i32) {
        let mut jobs = self.jobs.write().expect("job registry poisoned");
        if let Some(job) = jobs.get_mut(&remote_job_id) {
            job.local_job_id = local_job_id;
        }
    }

    /// Current mirror of the remote job-state, if the job is tracked.
    pub fn remote_state(&self, remote_job_id: i32) -> Option<RemoteJobState> {
        let jobs = self.jobs.read().expect("job registry poisoned");
        jobs.get(&remote_job_id).map(|job| job.remote_job_state)
    }

    /// Snapshot of a tracked job.
    pub fn get(&self, remote_job_id: i32) -> Option<ProxyJob> {
        let jobs = self.jobs.read().expect("job registry poisoned");
        jobs.get(&remote_job_id).copied()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().expect("job registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Park the relay worker until new work arrives or the timeout
    /// elapses. A wake-up posted while the worker was busy is not lost;
    /// the next wait returns immediately.
    pub async fn wait_for_work(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.work.notified()).await;
    }

    /// Wake the relay worker.
    pub fn wake(&self) {
        self.work.notify_one();
    }

    /// Ask every loop to drain to a safe point and exit.
    pub fn request_shutdown(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.work.notify_one();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_keyed_by_remote_id() {
        let registry = JobRegistry::new();
        assert!(registry.insert_if_absent(42, RemoteJobState::PENDING));
        assert!(!registry.insert_if_absent(42, RemoteJobState::PROCESSING));
        assert_eq!(registry.len(), 1);

        // The duplicate insert must not clobber the original record.
        assert_eq!(registry.remote_state(42), Some(RemoteJobState::PENDING));
    }

    #[test]
    fn claim_moves_job_out_of_pending() {
        let registry = JobRegistry::new();
        registry.insert_if_absent(7, RemoteJobState::PENDING);

        let claimed = registry.claim_next_pending().expect("one pending job");
        assert_eq!(claimed.remote_job_id, 7);

        // A second scan finds nothing: the claim owns the record.
        assert!(registry.claim_next_pending().is_none());
        assert_eq!(
            registry.get(7).unwrap().local_job_state,
            LocalJobState::Fetching
        );
    }

    #[test]
    fn claims_come_in_job_id_order() {
        let registry = JobRegistry::new();
        registry.insert_if_absent(9, RemoteJobState::PENDING);
        registry.insert_if_absent(3, RemoteJobState::PENDING);
        registry.insert_if_absent(5, RemoteJobState::PENDING);

        assert_eq!(registry.claim_next_pending().unwrap().remote_job_id, 3);
        assert_eq!(registry.claim_next_pending().unwrap().remote_job_id, 5);
        assert_eq!(registry.claim_next_pending().unwrap().remote_job_id, 9);
    }

    #[test]
    fn terminal_remote_jobs_are_not_claimed() {
        let registry = JobRegistry::new();
        registry.insert_if_absent(1, RemoteJobState::CANCELED);
        registry.insert_if_absent(2, RemoteJobState::COMPLETED);
        assert!(registry.claim_next_pending().is_none());
    }

    #[test]
    fn local_state_is_monotonic_once_terminal() {
        let registry = JobRegistry::new();
        registry.insert_if_absent(42, RemoteJobState::PENDING);

        registry.set_local_state(42, LocalJobState::Processing);
        registry.set_local_state(42, LocalJobState::Completed);
        registry.set_local_state(42, LocalJobState::Processing);

        assert_eq!(
            registry.get(42).unwrap().local_job_state,
            LocalJobState::Completed
        );
    }

    #[test]
    fn reap_removes_only_terminal_unowned_records() {
        let registry = JobRegistry::new();
        registry.insert_if_absent(1, RemoteJobState::PENDING);
        registry.insert_if_absent(2, RemoteJobState::PENDING);
        registry.insert_if_absent(3, RemoteJobState::PENDING);

        // Job 2 finished remotely; job 3 finished remotely but is still
        // being worked on.
        registry.update_remote_state(2, RemoteJobState::COMPLETED);
        registry.claim_next_pending();
        registry.claim_next_pending();
        registry.claim_next_pending();
        registry.update_remote_state(3, RemoteJobState::CANCELED);
        registry.set_local_state(2, LocalJobState::Completed);

        // Only job 2 is both remote-terminal and not in flight: jobs 1
        // and 3 must survive the purge.
        assert_eq!(registry.remove_if_terminal(), 1);
        assert!(registry.get(1).is_some());
        assert!(registry.get(2).is_none());
        assert!(registry.get(3).is_some());
    }

    #[test]
    fn unknown_state_change_is_ignored() {
        let registry = JobRegistry::new();
        assert!(!registry.update_remote_state(99, RemoteJobState::CANCELED));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn wait_for_work_returns_on_wake() {
        let registry = JobRegistry::new();
        registry.wake();
        // The stored wake-up satisfies the next wait immediately; a hang
        // here would trip the test harness timeout.
        registry.wait_for_work(Duration::from_secs(30)).await;
    }

    #[tokio::test]
    async fn wait_for_work_times_out_without_work() {
        let registry = JobRegistry::new();
        let before = std::time::Instant::now();
        registry.wait_for_work(Duration::from_millis(20)).await;
        assert!(before.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn shutdown_flag_round_trip() {
        let registry = JobRegistry::new();
        assert!(!registry.is_done());
        registry.request_shutdown();
        assert!(registry.is_done());
    }
}
