use dashmap::{mapref::entry::Entry, DashMap};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::types::LiveJob;

/// Concurrent directory of live jobs.
///
/// Keyed by the caller's unique id; a secondary index maps job ids to each
/// job's own cancellation token so a cancel request reaches exactly one task.
#[derive(Default)]
pub struct JobRegistry {
    by_unique: DashMap<String, LiveJob>,
    by_job: DashMap<String, CancellationToken>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `job`. Returns the job previously registered under the same
    /// unique id, if any; the caller decides what happens to it.
    ///
    /// Claiming the job id is atomic: if another live job already holds it
    /// nothing is stored and `DuplicateJobId` is returned.
    pub fn register(&self, job: LiveJob) -> Result<Option<LiveJob>> {
        match self.by_job.entry(job.job_id.clone()) {
            Entry::Occupied(_) => {
                return Err(SchedulerError::DuplicateJobId {
                    id: job.job_id.clone(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(job.cancel_token());
            }
        }
        let previous = self.by_unique.insert(job.unique_id.clone(), job);
        debug!(live = self.by_job.len(), "job registered");
        Ok(previous)
    }

    pub fn lookup_job_id(&self, unique_id: &str) -> Option<String> {
        self.by_unique.get(unique_id).map(|j| j.job_id.clone())
    }

    pub fn contains_job(&self, job_id: &str) -> bool {
        self.by_job.contains_key(job_id)
    }

    /// Remove the job. The unique-id entry is only dropped while it still
    /// points at `job_id`, so a newer job registered under the same key stays.
    pub fn deregister(&self, unique_id: &str, job_id: &str) -> bool {
        let had_job = self.by_job.remove(job_id).is_some();
        self.by_unique
            .remove_if(unique_id, |_, j| j.job_id == job_id);
        had_job
    }

    /// Signal one job's task. Returns whether that job was live.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.by_job.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every live task. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let mut n = 0;
        for entry in self.by_job.iter() {
            entry.value().cancel();
            n += 1;
        }
        n
    }

    /// Point-in-time copy of every registered job.
    ///
    /// Jobs terminating while the copy is taken may or may not appear, but
    /// each appears at most once.
    pub fn snapshot(&self) -> Vec<LiveJob> {
        self.by_unique
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_job.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_job.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postal_protocol::{MailMessage, NewJobArgs};
    use std::time::Duration;
    use tokio::time::Instant;

    fn job(job_id: &str, unique_id: &str) -> LiveJob {
        let args = NewJobArgs::new(
            unique_id,
            Duration::from_secs(5),
            MailMessage {
                sender_name: "n".into(),
                recipient: "r@example.com".into(),
                subject: "s".into(),
                body: "b".into(),
            },
        );
        LiveJob::new(job_id.to_string(), args, Instant::now())
    }

    #[test]
    fn register_lookup_deregister() {
        let registry = JobRegistry::new();
        assert!(registry.register(job("j1", "u1")).unwrap().is_none());
        assert_eq!(registry.lookup_job_id("u1").as_deref(), Some("j1"));
        assert!(registry.contains_job("j1"));

        assert!(registry.deregister("u1", "j1"));
        assert!(registry.lookup_job_id("u1").is_none());
        assert!(registry.is_empty());
        // second deregister is a no-op
        assert!(!registry.deregister("u1", "j1"));
    }

    #[test]
    fn stale_deregister_keeps_newer_entry() {
        let registry = JobRegistry::new();
        registry.register(job("old", "u1")).unwrap();
        let previous = registry.register(job("new", "u1")).unwrap();
        assert_eq!(previous.map(|j| j.job_id).as_deref(), Some("old"));

        registry.deregister("u1", "old");
        assert_eq!(registry.lookup_job_id("u1").as_deref(), Some("new"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn taken_job_id_is_rejected_without_side_effects() {
        let registry = JobRegistry::new();
        let first = job("j1", "u1");
        registry.register(first.clone()).unwrap();

        let err = registry.register(job("j1", "u2")).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJobId { ref id } if id == "j1"));
        assert!(registry.lookup_job_id("u2").is_none());
        assert_eq!(registry.lookup_job_id("u1").as_deref(), Some("j1"));

        // The original job's token is still the one indexed.
        assert!(registry.cancel("j1"));
        assert!(first.is_cancelled());
    }

    #[test]
    fn concurrent_claims_of_one_job_id_admit_exactly_one() {
        let registry = JobRegistry::new();
        let winners = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let registry = &registry;
                    scope.spawn(move || registry.register(job("shared", &format!("u{i}"))).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });

        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn cancel_targets_one_job() {
        let registry = JobRegistry::new();
        let a = job("a", "ua");
        let b = job("b", "ub");
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        assert!(registry.cancel("a"));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!registry.cancel("missing"));
    }

    #[test]
    fn cancel_all_and_snapshot() {
        let registry = JobRegistry::new();
        let a = job("a", "ua");
        let b = job("b", "ub");
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        let mut ids: Vec<String> = registry.snapshot().into_iter().map(|j| j.job_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
    }
}
