use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ScanType {
    Nuclei,
    Nmap,
    Amass,
    Custom,
}

impl ScanType {
    pub const ALL: [ScanType; 4] = [Self::Nuclei, Self::Nmap, Self::Amass, Self::Custom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nuclei => "nuclei",
            Self::Nmap => "nmap",
            Self::Amass => "amass",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for ScanType {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ScanError::validation(format!("unknown scan type: {s}")))
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `completed` and `failed` both close the run and stamp `completed_at`.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ScanError::validation(format!("unknown status: {s}")))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared lowest to highest so the derived `Ord` matches the risk order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }

    pub fn score(&self) -> u8 {
        match self {
            Self::Critical => 5,
            Self::High => 4,
            Self::Medium => 3,
            Self::Low => 2,
            Self::Info => 1,
        }
    }
}

impl FromStr for Severity {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| ScanError::validation(format!("unknown severity: {s}")))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rank of a raw severity label; anything outside the known set ranks 0.
pub fn severity_score(raw: &str) -> u8 {
    raw.parse::<Severity>().map(|s| s.score()).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub target: String,
    pub scan_type: ScanType,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    /// A fresh `pending` job with no lifecycle timestamps.
    pub fn new(
        target: String,
        scan_type: ScanType,
        metadata: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            scan_type,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Elapsed run time, zero unless both lifecycle stamps are present.
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => completed - started,
            _ => Duration::zero(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFinding {
    pub id: Uuid,
    pub scan_job_id: Uuid,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub cvss_score: Option<f64>,
    pub cve_id: Option<String>,
    pub cwe_id: Option<String>,
    pub evidence: Option<String>,
    pub remediation: Option<String>,
    pub references: Vec<String>,
    pub discovered_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanFinding {
    pub fn severity_score(&self) -> u8 {
        self.severity.score()
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    pub fn is_high_risk(&self) -> bool {
        matches!(self.severity, Severity::Critical | Severity::High)
    }
}

/// A job together with the findings it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanJobWithFindings {
    pub job: ScanJob,
    pub findings: Vec<ScanFinding>,
}

/// Caller-supplied shape of a finding before it is attached to a job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewFinding {
    pub severity: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub cvss_score: Option<f64>,
    #[serde(default)]
    pub cve_id: Option<String>,
    #[serde(default)]
    pub cwe_id: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub remediation: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub discovered_at: Option<DateTime<Utc>>,
}

impl NewFinding {
    /// Validate the raw fields and build the stored entity.
    pub fn into_finding(
        self,
        scan_job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ScanFinding, ScanError> {
        let severity: Severity = self.severity.parse()?;
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ScanError::validation("finding title is required"));
        }
        let cvss_score = match self.cvss_score {
            Some(score) if !(0.0..=10.0).contains(&score) => {
                return Err(ScanError::validation(format!(
                    "cvss score {score} outside 0.0..=10.0"
                )))
            }
            Some(score) => Some((score * 10.0).round() / 10.0),
            None => None,
        };

        Ok(ScanFinding {
            id: Uuid::new_v4(),
            scan_job_id,
            severity,
            title,
            description: self.description,
            host: self.host,
            port: self.port,
            protocol: self.protocol,
            cvss_score,
            cve_id: self.cve_id,
            cwe_id: self.cwe_id,
            evidence: self.evidence,
            remediation: self.remediation,
            references: self.references,
            discovered_at: self.discovered_at.unwrap_or(now),
            created_at: now,
            updated_at: now,
        })
    }
}
