mod sqlite;

pub use sqlite::SqliteScanStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::Result,
    lifecycle::Transition,
    metrics::{Counts, GroupField, MetricCounts},
    models::{ScanFinding, ScanJob, ScanJobWithFindings},
    query::ListRequest,
};

/// Persistence for scan jobs and their findings.
///
/// Every read except [`ScanStore::exists`] hides soft-deleted jobs. Each call
/// is atomic on its own.
#[async_trait::async_trait]
pub trait ScanStore: Send + Sync {
    async fn create(&self, job: &ScanJob) -> Result<()>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ScanJob>>;

    async fn get_by_id_with_findings(&self, id: Uuid) -> Result<Option<ScanJobWithFindings>>;

    /// One page of jobs, newest first, with the unpaginated total for the
    /// same filter taken from the same snapshot.
    async fn list(&self, request: &ListRequest) -> Result<(Vec<ScanJob>, u64)>;

    /// Write a status change and its stamps. Stamps already present on the
    /// row are kept. `None` when no live job has this id.
    async fn update(&self, id: Uuid, transition: &Transition) -> Result<Option<ScanJob>>;

    /// Mark a live job deleted. `false` when no live job has this id.
    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Remove the row and its findings, deleted or not.
    async fn purge(&self, id: Uuid) -> Result<bool>;

    /// Raw row existence, soft-deleted rows included.
    async fn exists(&self, id: Uuid) -> Result<bool>;

    async fn count_grouped_by(&self, field: GroupField) -> Result<Counts>;

    /// Finding counts per severity over live jobs.
    async fn count_findings_by_severity(&self) -> Result<Counts>;

    /// Status, type and severity counts. Implementations should take all
    /// three from one snapshot so `scans_total` agrees with `by_type`.
    async fn metric_counts(&self) -> Result<MetricCounts> {
        Ok(MetricCounts {
            by_status: self.count_grouped_by(GroupField::Status).await?,
            by_type: self.count_grouped_by(GroupField::ScanType).await?,
            by_severity: self.count_findings_by_severity().await?,
        })
    }

    /// `false` when the owning job is missing or soft-deleted.
    async fn add_finding(&self, finding: &ScanFinding) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}
