use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::models::{Job, JobStatus};

/// Job counts by status
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct JobStoreStats {
    pub total_jobs: usize,
    pub in_flight_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
}

/// In-memory view of server-side jobs, newest first
///
/// Every change to the set of job ids (insert, remove, reload) bumps a
/// generation counter that the reconciliation loop watches to restart its
/// schedule. Overwriting an existing job does not.
#[derive(Debug, Clone)]
pub struct JobStore {
    jobs: Arc<RwLock<Vec<Job>>>,
    generation: Arc<watch::Sender<u64>>,
}

impl JobStore {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            generation: Arc::new(generation),
        }
    }

    /// Notified whenever the collection changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    pub async fn snapshot(&self) -> Vec<Job> {
        self.jobs.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.iter().find(|job| job.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Replace everything with a fresh server listing
    pub async fn replace_all(&self, jobs: Vec<Job>) {
        let count = jobs.len();
        *self.jobs.write().await = jobs;
        self.bump();
        info!("📊 Job store loaded with {} jobs", count);
    }

    /// Add a newly created job at the front; an existing id is replaced in place
    pub async fn insert_front(&self, job: Job) {
        {
            let mut jobs = self.jobs.write().await;
            if let Some(existing) = jobs.iter_mut().find(|j| j.id == job.id) {
                *existing = job;
                return;
            }
            jobs.insert(0, job);
        }
        self.bump();
    }

    /// Overwrite a job with a fresher server copy.
    ///
    /// Returns false when the job is no longer tracked; a refresh landing
    /// after a delete must not resurrect it.
    pub async fn update(&self, job: Job) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => {
                if existing.status != job.status {
                    debug!("Job {} {:?} → {:?}", job.id, existing.status, job.status);
                }
                *existing = job;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut jobs = self.jobs.write().await;
            let before = jobs.len();
            jobs.retain(|j| j.id != id);
            jobs.len() != before
        };
        if removed {
            self.bump();
        }
        removed
    }

    /// Ids of jobs still pending, downloading or processing
    pub async fn in_flight_ids(&self) -> Vec<String> {
        self.jobs
            .read()
            .await
            .iter()
            .filter(|job| job.status.is_in_flight())
            .map(|job| job.id.clone())
            .collect()
    }

    pub async fn get_statistics(&self) -> JobStoreStats {
        let jobs = self.jobs.read().await;
        let mut stats = JobStoreStats {
            total_jobs: jobs.len(),
            ..Default::default()
        };
        for job in jobs.iter() {
            match job.status {
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
                _ => stats.in_flight_jobs += 1,
            }
        }
        stats
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, status: JobStatus) -> Job {
        let mut job = Job::pending(id, format!("https://x/{}", id));
        job.status = status;
        job
    }

    #[tokio::test]
    async fn test_insert_front_orders_newest_first() {
        let store = JobStore::new();
        store.insert_front(job("a", JobStatus::Pending)).await;
        store.insert_front(job("b", JobStatus::Pending)).await;

        let ids: Vec<_> = store.snapshot().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_update_does_not_resurrect() {
        let store = JobStore::new();
        store.insert_front(job("a", JobStatus::Pending)).await;
        assert!(store.remove("a").await);

        assert!(!store.update(job("a", JobStatus::Completed)).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_generation_tracks_collection_changes_only() {
        let store = JobStore::new();
        let rx = store.subscribe();

        store.insert_front(job("a", JobStatus::Pending)).await;
        assert_eq!(*rx.borrow(), 1);

        store.update(job("a", JobStatus::Downloading)).await;
        assert_eq!(*rx.borrow(), 1);

        store.replace_all(vec![job("b", JobStatus::Completed)]).await;
        assert_eq!(*rx.borrow(), 2);

        assert!(!store.remove("missing").await);
        assert_eq!(*rx.borrow(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_and_statistics() {
        let store = JobStore::new();
        store
            .replace_all(vec![
                job("a", JobStatus::Pending),
                job("b", JobStatus::Completed),
                job("c", JobStatus::Processing),
                job("d", JobStatus::Failed),
            ])
            .await;

        assert_eq!(store.in_flight_ids().await, vec!["a", "c"]);
        let stats = store.get_statistics().await;
        assert_eq!(stats.total_jobs, 4);
        assert_eq!(stats.in_flight_jobs, 2);
        assert_eq!(stats.completed_jobs, 1);
        assert_eq!(stats.failed_jobs, 1);
    }
}
