//! Bounded history of finished jobs.

use crate::job::{JobId, JobStatus};
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// FIFO of terminal jobs, oldest first. Never grows past its capacity.
#[derive(Debug, Clone)]
pub struct JobHistory {
    entries: VecDeque<JobStatus>,
    capacity: usize,
}

impl JobHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a job, evicting the oldest entry when full. Returns the evicted job.
    pub fn push(&mut self, job: JobStatus) -> Option<JobStatus> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(job);
        evicted
    }

    pub fn get(&self, id: &JobId) -> Option<&JobStatus> {
        self.entries.iter().find(|job| &job.id == id)
    }

    pub fn last(&self) -> Option<&JobStatus> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobStatus> {
        self.entries.iter()
    }

    /// Copy of all entries, oldest first
    pub fn to_vec(&self) -> Vec<JobStatus> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for JobHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobType;
    use chrono::{Duration, TimeZone, Utc};

    fn finished_job(offset: i64) -> JobStatus {
        let started = Utc.with_ymd_and_hms(2025, 1, 31, 2, 0, 0).unwrap() + Duration::minutes(offset);
        let mut job = JobStatus::new(JobType::SyncOnly, started);
        job.complete(started + Duration::seconds(10)).unwrap();
        job
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut history = JobHistory::new(3);
        let jobs: Vec<JobStatus> = (0..4).map(finished_job).collect();

        for job in jobs.iter().take(3) {
            assert!(history.push(job.clone()).is_none());
        }
        let evicted = history.push(jobs[3].clone()).unwrap();

        assert_eq!(evicted.id, jobs[0].id);
        assert_eq!(history.len(), 3);
        assert!(history.get(&jobs[0].id).is_none());
        let ids: Vec<&JobId> = history.iter().map(|job| &job.id).collect();
        assert_eq!(ids, vec![&jobs[1].id, &jobs[2].id, &jobs[3].id]);
        assert_eq!(history.last().unwrap().id, jobs[3].id);
    }

    #[test]
    fn test_default_capacity() {
        let history = JobHistory::default();
        assert_eq!(history.capacity(), 50);
        assert!(history.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut history = JobHistory::new(0);
        history.push(finished_job(0));
        history.push(finished_job(1));
        assert_eq!(history.len(), 1);
    }
}
