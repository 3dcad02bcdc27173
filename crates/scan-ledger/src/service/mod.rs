//! Operations exposed to the HTTP boundary. Every store call runs under the
//! caller's [`RequestContext`] deadline; a call that times out is dropped
//! before commit and surfaces as `StoreUnavailable`.

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::info;
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::{Result, ScanError},
    lifecycle::Transition,
    metrics::{EventSource, Metrics},
    models::{JobStatus, NewFinding, ScanJob, ScanType},
    query::ScanQuery,
    store::ScanStore,
    views::{FindingView, Page, ScanJobDetailView, ScanJobView},
};

#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub timeout: Duration,
}

impl RequestContext {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.timeout, call).await?
    }
}

pub fn parse_job_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ScanError::validation(format!("invalid scan job id: {raw}")))
}

fn missing(id: Uuid) -> ScanError {
    ScanError::not_found(format!("scan job {id} does not exist"))
}

#[derive(Clone)]
pub struct ScanService {
    store: Arc<dyn ScanStore>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<dyn EventSource>>,
}

impl ScanService {
    pub fn new(store: Arc<dyn ScanStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSource>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create_job(
        &self,
        ctx: &RequestContext,
        target: &str,
        scan_type: &str,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<ScanJobView> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ScanError::validation("target is required"));
        }
        let scan_type: ScanType = scan_type.parse()?;

        let job = ScanJob::new(
            target.to_string(),
            scan_type,
            metadata.unwrap_or_default(),
            self.clock.now(),
        );
        ctx.run(self.store.create(&job)).await?;

        info!(
            job_id = %job.id,
            target = %job.target,
            scan_type = %job.scan_type,
            "scan job created"
        );
        Ok(ScanJobView::from(&job))
    }

    pub async fn get_job(&self, ctx: &RequestContext, id: Uuid) -> Result<ScanJobDetailView> {
        let detail = ctx
            .run(self.store.get_by_id_with_findings(id))
            .await?
            .ok_or_else(|| missing(id))?;
        Ok(ScanJobDetailView::from(&detail))
    }

    pub async fn list_jobs(
        &self,
        ctx: &RequestContext,
        query: ScanQuery,
    ) -> Result<Page<ScanJobView>> {
        let request = query.validate()?;
        let (jobs, total) = ctx.run(self.store.list(&request)).await?;
        let data = jobs.iter().map(ScanJobView::from).collect();
        Ok(Page::new(data, request.page, total))
    }

    /// Write any status in the closed set. `error_message` is only accepted
    /// together with `failed`.
    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        status: &str,
        error_message: Option<String>,
    ) -> Result<ScanJobView> {
        let status: JobStatus = status.parse()?;
        let transition = Transition::plan(status, error_message, self.clock.now())?;
        let job = ctx
            .run(self.store.update(id, &transition))
            .await?
            .ok_or_else(|| missing(id))?;

        info!(job_id = %id, status = %job.status, "scan job status updated");
        Ok(ScanJobView::from(&job))
    }

    pub async fn delete_job(&self, ctx: &RequestContext, id: Uuid) -> Result<()> {
        let deleted = ctx.run(self.store.soft_delete(id, self.clock.now())).await?;
        if !deleted {
            return Err(missing(id));
        }
        info!(job_id = %id, "scan job deleted");
        Ok(())
    }

    /// Hard delete, soft-deleted rows included. Findings go with the job.
    pub async fn purge_job(&self, ctx: &RequestContext, id: Uuid) -> Result<()> {
        if !ctx.run(self.store.purge(id)).await? {
            return Err(missing(id));
        }
        info!(job_id = %id, "scan job purged");
        Ok(())
    }

    pub async fn add_finding(
        &self,
        ctx: &RequestContext,
        job_id: Uuid,
        finding: NewFinding,
    ) -> Result<FindingView> {
        let finding = finding.into_finding(job_id, self.clock.now())?;
        if !ctx.run(self.store.add_finding(&finding)).await? {
            return Err(missing(job_id));
        }
        info!(
            job_id = %job_id,
            finding_id = %finding.id,
            severity = %finding.severity,
            "finding recorded"
        );
        Ok(FindingView::from(&finding))
    }

    /// One deadline covers the store snapshot and the event totals together.
    pub async fn metrics(&self, ctx: &RequestContext) -> Result<Metrics> {
        ctx.run(async {
            let counts = self.store.metric_counts().await?;
            let events = match &self.events {
                Some(source) => Some(source.totals().await?),
                None => None,
            };
            Ok(Metrics::aggregate(
                &counts.by_status,
                counts.by_type,
                counts.by_severity,
                events,
            ))
        })
        .await
    }

    pub async fn ping_store(&self, ctx: &RequestContext) -> Result<()> {
        ctx.run(self.store.ping()).await
    }
}
