use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    models::{JobStatus, ScanFinding, ScanJob, ScanJobWithFindings, ScanType, Severity},
    query::{total_pages, PageRequest},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanJobView {
    pub id: Uuid,
    pub target: String,
    pub scan_type: ScanType,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanJobDetailView {
    #[serde(flatten)]
    pub job: ScanJobView,
    pub findings: Vec<FindingView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingView {
    pub id: Uuid,
    pub scan_job_id: Uuid,
    pub severity: Severity,
    pub severity_score: u8,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cve_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwe_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
}

impl From<&ScanJob> for ScanJobView {
    fn from(job: &ScanJob) -> Self {
        let duration = match (job.started_at, job.completed_at) {
            (Some(_), Some(_)) => Some(human_duration(job.duration())),
            _ => None,
        };
        Self {
            id: job.id,
            target: job.target.clone(),
            scan_type: job.scan_type,
            status: job.status,
            started_at: job.started_at,
            completed_at: job.completed_at,
            duration,
            error_message: job.error_message.clone(),
            metadata: job.metadata.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

impl From<&ScanFinding> for FindingView {
    fn from(finding: &ScanFinding) -> Self {
        Self {
            id: finding.id,
            scan_job_id: finding.scan_job_id,
            severity: finding.severity,
            severity_score: finding.severity_score(),
            title: finding.title.clone(),
            description: finding.description.clone(),
            host: finding.host.clone(),
            port: finding.port,
            protocol: finding.protocol.clone(),
            cvss_score: finding.cvss_score,
            cve_id: finding.cve_id.clone(),
            cwe_id: finding.cwe_id.clone(),
            evidence: finding.evidence.clone(),
            remediation: finding.remediation.clone(),
            references: finding.references.clone(),
            discovered_at: finding.discovered_at,
        }
    }
}

impl From<&ScanJobWithFindings> for ScanJobDetailView {
    fn from(detail: &ScanJobWithFindings) -> Self {
        Self {
            job: ScanJobView::from(&detail.job),
            findings: detail.findings.iter().map(FindingView::from).collect(),
        }
    }
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, page: PageRequest, total_count: u64) -> Self {
        Self {
            data,
            page: page.page,
            page_size: page.page_size,
            total_count,
            total_pages: total_pages(total_count, page.page_size),
        }
    }
}

/// Render e.g. `1m 25s`; negative spans collapse to `0s`.
pub fn human_duration(duration: chrono::Duration) -> String {
    let std = duration.to_std().unwrap_or_default();
    humantime::format_duration(std).to_string()
}
