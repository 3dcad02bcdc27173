//! Status changes and the timestamp side effects they carry.
//!
//! Any status in the closed set may be written from any other status. The
//! only rules are the set-once stamps: `started_at` on the first entry into
//! `running`, `completed_at` on the first entry into `completed` or `failed`.
//! An error message only lives while the job is `failed`.

use chrono::{DateTime, Utc};

use crate::{
    error::{Result, ScanError},
    models::{JobStatus, ScanJob},
};

/// A planned status write. The stamp fields are candidates only: they are
/// applied when the job does not already carry a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn plan(
        status: JobStatus,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let error_message = error_message.filter(|m| !m.trim().is_empty());
        if error_message.is_some() && status != JobStatus::Failed {
            return Err(ScanError::validation(format!(
                "error_message is only accepted with status failed, got {status}"
            )));
        }

        Ok(Self {
            status,
            started_at: (status == JobStatus::Running).then_some(now),
            completed_at: status.is_finished().then_some(now),
            error_message,
            at: now,
        })
    }

    /// Apply to an in-memory job with the same set-once semantics the store
    /// enforces in SQL.
    pub fn apply(&self, job: &mut ScanJob) {
        job.status = self.status;
        if job.started_at.is_none() {
            job.started_at = self.started_at;
        }
        if job.completed_at.is_none() {
            job.completed_at = self.completed_at;
        }
        if self.status != JobStatus::Failed {
            job.error_message = None;
        } else if let Some(message) = &self.error_message {
            job.error_message = Some(message.clone());
        }
        job.updated_at = self.at;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::models::ScanType;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn job() -> ScanJob {
        ScanJob::new("example.com".into(), ScanType::Nuclei, BTreeMap::new(), t(0))
    }

    fn step(job: &mut ScanJob, status: JobStatus, at: i64) {
        Transition::plan(status, None, t(at)).unwrap().apply(job);
    }

    #[test]
    fn running_stamps_started_at_once() {
        let mut job = job();
        step(&mut job, JobStatus::Running, 5);
        assert_eq!(job.started_at, Some(t(5)));
        assert_eq!(job.completed_at, None);

        step(&mut job, JobStatus::Running, 9);
        assert_eq!(job.started_at, Some(t(5)));
        assert_eq!(job.updated_at, t(9));
    }

    #[test]
    fn completion_stamp_survives_later_finishes() {
        let mut job = job();
        step(&mut job, JobStatus::Completed, 10);
        step(&mut job, JobStatus::Failed, 20);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed_at, Some(t(10)));

        let mut other = self::job();
        step(&mut other, JobStatus::Failed, 3);
        step(&mut other, JobStatus::Completed, 4);
        assert_eq!(other.completed_at, Some(t(3)));
    }

    #[test]
    fn pending_and_cancelled_leave_stamps_alone() {
        let mut job = job();
        step(&mut job, JobStatus::Cancelled, 1);
        step(&mut job, JobStatus::Pending, 2);
        assert_eq!(job.started_at, None);
        assert_eq!(job.completed_at, None);
    }

    #[test]
    fn any_status_may_follow_any_other() {
        let mut job = job();
        step(&mut job, JobStatus::Completed, 1);
        step(&mut job, JobStatus::Cancelled, 2);
        step(&mut job, JobStatus::Running, 3);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(t(3)));
        assert_eq!(job.completed_at, Some(t(1)));
    }

    #[test]
    fn error_message_only_with_failed() {
        let err = Transition::plan(JobStatus::Completed, Some("boom".into()), t(0)).unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let mut job = job();
        Transition::plan(JobStatus::Failed, Some("nmap exited 1".into()), t(7))
            .unwrap()
            .apply(&mut job);
        assert_eq!(job.error_message.as_deref(), Some("nmap exited 1"));
        assert_eq!(job.completed_at, Some(t(7)));
    }

    #[test]
    fn leaving_failed_clears_the_message() {
        let mut job = job();
        Transition::plan(JobStatus::Failed, Some("boom".into()), t(1))
            .unwrap()
            .apply(&mut job);
        step(&mut job, JobStatus::Failed, 2);
        assert_eq!(job.error_message.as_deref(), Some("boom"));

        step(&mut job, JobStatus::Completed, 3);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.error_message, None);
    }
}
