use serde::{Deserialize, Deserializer};
use sqlx::{QueryBuilder, Sqlite};

use crate::{
    error::{Result, ScanError},
    models::{JobStatus, ScanJob, ScanType},
};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Raw listing parameters as they arrive from the boundary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanQuery {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub page_size: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub scan_type: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub scan_type: Option<ScanType>,
    /// Case-sensitive substring of the job target.
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub filter: JobFilter,
    pub page: PageRequest,
}

impl ScanQuery {
    /// Check ranges and enumerations, coercing zero/absent paging to defaults.
    pub fn validate(self) -> Result<ListRequest> {
        let page = match self.page {
            None | Some(0) => DEFAULT_PAGE,
            Some(p) if p < 0 => {
                return Err(ScanError::validation(format!("page must be >= 1, got {p}")))
            }
            Some(p) => u32::try_from(p)
                .map_err(|_| ScanError::validation(format!("page {p} is too large")))?,
        };
        let page_size = match self.page_size {
            None | Some(0) => DEFAULT_PAGE_SIZE,
            Some(s) if !(1..=MAX_PAGE_SIZE as i64).contains(&s) => {
                return Err(ScanError::validation(format!(
                    "page_size must be within 1..={MAX_PAGE_SIZE}, got {s}"
                )))
            }
            Some(s) => s as u32,
        };

        let status = non_empty(self.status)
            .map(|s| s.parse::<JobStatus>())
            .transpose()?;
        let scan_type = non_empty(self.scan_type)
            .map(|s| s.parse::<ScanType>())
            .transpose()?;

        Ok(ListRequest {
            filter: JobFilter {
                status,
                scan_type,
                target: non_empty(self.target),
            },
            page: PageRequest { page, page_size },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// `?page=` reads as absent rather than as a parse failure.
fn blank_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

impl JobFilter {
    /// Append the `WHERE` clause shared by the count and the page query, so
    /// both always see the same rows.
    pub fn push_predicates(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE deleted_at IS NULL");
        if let Some(status) = self.status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        if let Some(scan_type) = self.scan_type {
            qb.push(" AND scan_type = ");
            qb.push_bind(scan_type.as_str());
        }
        if let Some(target) = &self.target {
            // instr() is case-sensitive where LIKE is not.
            qb.push(" AND instr(target, ");
            qb.push_bind(target.clone());
            qb.push(") > 0");
        }
    }

    /// In-memory equivalent of `push_predicates`.
    pub fn matches(&self, job: &ScanJob) -> bool {
        !job.is_deleted()
            && self.status.is_none_or(|s| s == job.status)
            && self.scan_type.is_none_or(|t| t == job.scan_type)
            && self.target.as_deref().is_none_or(|t| job.target.contains(t))
    }
}

pub fn total_pages(total_count: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total_count.div_ceil(u64::from(page_size))
}
