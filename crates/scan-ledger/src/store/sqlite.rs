use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{types::Json, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::ScanStore;
use crate::{
    error::Result,
    lifecycle::Transition,
    metrics::{Counts, GroupField, MetricCounts},
    models::{JobStatus, ScanFinding, ScanJob, ScanJobWithFindings, ScanType, Severity},
    query::ListRequest,
};

const JOB_COLUMNS: &str = "id, target, scan_type, status, started_at, completed_at, \
     error_message, metadata, created_at, updated_at, deleted_at";

const FINDING_COLUMNS: &str = "id, scan_job_id, severity, title, description, host, port, \
     protocol, cvss_score, cve_id, cwe_id, evidence, remediation, refs, discovered_at, \
     created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteScanStore {
    pool: SqlitePool,
}

impl SqliteScanStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScanJobRow {
    id: Uuid,
    target: String,
    scan_type: ScanType,
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    metadata: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<ScanJobRow> for ScanJob {
    fn from(row: ScanJobRow) -> Self {
        Self {
            id: row.id,
            target: row.target,
            scan_type: row.scan_type,
            status: row.status,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            metadata: row.metadata.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FindingRow {
    id: Uuid,
    scan_job_id: Uuid,
    severity: Severity,
    title: String,
    description: Option<String>,
    host: Option<String>,
    port: Option<i64>,
    protocol: Option<String>,
    cvss_score: Option<f64>,
    cve_id: Option<String>,
    cwe_id: Option<String>,
    evidence: Option<String>,
    remediation: Option<String>,
    refs: Json<Vec<String>>,
    discovered_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FindingRow> for ScanFinding {
    fn from(row: FindingRow) -> Self {
        Self {
            id: row.id,
            scan_job_id: row.scan_job_id,
            severity: row.severity,
            title: row.title,
            description: row.description,
            host: row.host,
            port: row.port.and_then(|p| u16::try_from(p).ok()),
            protocol: row.protocol,
            cvss_score: row.cvss_score,
            cve_id: row.cve_id,
            cwe_id: row.cwe_id,
            evidence: row.evidence,
            remediation: row.remediation,
            references: row.refs.0,
            discovered_at: row.discovered_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn counts(rows: Vec<(String, i64)>) -> Counts {
    rows.into_iter().collect()
}

async fn grouped_jobs(conn: &mut SqliteConnection, field: GroupField) -> Result<Counts> {
    let column = field.column();
    let sql = format!(
        "SELECT {column}, COUNT(*) FROM scan_jobs WHERE deleted_at IS NULL GROUP BY {column}"
    );
    let rows: Vec<(String, i64)> = sqlx::query_as(&sql).fetch_all(conn).await?;
    Ok(counts(rows))
}

async fn grouped_findings(conn: &mut SqliteConnection) -> Result<Counts> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT f.severity, COUNT(*) FROM scan_findings f \
         JOIN scan_jobs j ON j.id = f.scan_job_id \
         WHERE j.deleted_at IS NULL GROUP BY f.severity",
    )
    .fetch_all(conn)
    .await?;
    Ok(counts(rows))
}

#[async_trait::async_trait]
impl ScanStore for SqliteScanStore {
    async fn create(&self, job: &ScanJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_jobs(id, target, scan_type, status, started_at, completed_at, error_message, metadata, created_at, updated_at) \
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id)
        .bind(&job.target)
        .bind(job.scan_type.as_str())
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(Json(&job.metadata))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ScanJob>> {
        let sql =
            format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = ? AND deleted_at IS NULL");
        let row = sqlx::query_as::<_, ScanJobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ScanJob::from))
    }

    async fn get_by_id_with_findings(&self, id: Uuid) -> Result<Option<ScanJobWithFindings>> {
        let mut tx = self.pool.begin().await?;

        let sql =
            format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = ? AND deleted_at IS NULL");
        let Some(row) = sqlx::query_as::<_, ScanJobRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let sql = format!("SELECT {FINDING_COLUMNS} FROM scan_findings WHERE scan_job_id = ?");
        let mut findings: Vec<ScanFinding> = sqlx::query_as::<_, FindingRow>(&sql)
            .bind(id)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(ScanFinding::from)
            .collect();
        tx.commit().await?;

        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.discovered_at.cmp(&b.discovered_at))
        });

        Ok(Some(ScanJobWithFindings {
            job: row.into(),
            findings,
        }))
    }

    async fn list(&self, request: &ListRequest) -> Result<(Vec<ScanJob>, u64)> {
        let mut tx = self.pool.begin().await?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM scan_jobs");
        request.filter.push_predicates(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(&mut *tx).await?;

        let mut page =
            QueryBuilder::<Sqlite>::new(format!("SELECT {JOB_COLUMNS} FROM scan_jobs"));
        request.filter.push_predicates(&mut page);
        page.push(" ORDER BY created_at DESC, rowid DESC LIMIT ");
        page.push_bind(request.page.limit());
        page.push(" OFFSET ");
        page.push_bind(request.page.offset());
        let rows: Vec<ScanJobRow> = page.build_query_as().fetch_all(&mut *tx).await?;

        tx.commit().await?;
        Ok((
            rows.into_iter().map(ScanJob::from).collect(),
            u64::try_from(total).unwrap_or_default(),
        ))
    }

    async fn update(&self, id: Uuid, transition: &Transition) -> Result<Option<ScanJob>> {
        // One statement: the status and its stamps land together, and
        // COALESCE keeps whichever stamp was written first.
        let sql = format!(
            "UPDATE scan_jobs SET \
                 status = ?1, \
                 started_at = COALESCE(started_at, ?2), \
                 completed_at = COALESCE(completed_at, ?3), \
                 error_message = CASE WHEN ?1 = 'failed' \
                     THEN COALESCE(?4, error_message) ELSE NULL END, \
                 updated_at = ?5 \
             WHERE id = ?6 AND deleted_at IS NULL \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ScanJobRow>(&sql)
            .bind(transition.status.as_str())
            .bind(transition.started_at)
            .bind(transition.completed_at)
            .bind(&transition.error_message)
            .bind(transition.at)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ScanJob::from))
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE scan_jobs SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn purge(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query("DELETE FROM scan_jobs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(res.rows_affected() > 0)
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM scan_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn count_grouped_by(&self, field: GroupField) -> Result<Counts> {
        let mut conn = self.pool.acquire().await?;
        grouped_jobs(&mut conn, field).await
    }

    async fn count_findings_by_severity(&self) -> Result<Counts> {
        let mut conn = self.pool.acquire().await?;
        grouped_findings(&mut conn).await
    }

    async fn metric_counts(&self) -> Result<MetricCounts> {
        let mut tx = self.pool.begin().await?;
        let by_status = grouped_jobs(&mut tx, GroupField::Status).await?;
        let by_type = grouped_jobs(&mut tx, GroupField::ScanType).await?;
        let by_severity = grouped_findings(&mut tx).await?;
        tx.commit().await?;
        Ok(MetricCounts {
            by_status,
            by_type,
            by_severity,
        })
    }

    async fn add_finding(&self, finding: &ScanFinding) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let live: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM scan_jobs WHERE id = ? AND deleted_at IS NULL")
                .bind(finding.scan_job_id)
                .fetch_optional(&mut *tx)
                .await?;
        if live.is_none() {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO scan_findings(id, scan_job_id, severity, title, description, host, port, protocol, \
             cvss_score, cve_id, cwe_id, evidence, remediation, refs, discovered_at, created_at, updated_at) \
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(finding.id)
        .bind(finding.scan_job_id)
        .bind(finding.severity.as_str())
        .bind(&finding.title)
        .bind(&finding.description)
        .bind(&finding.host)
        .bind(finding.port.map(i64::from))
        .bind(&finding.protocol)
        .bind(finding.cvss_score)
        .bind(&finding.cve_id)
        .bind(&finding.cwe_id)
        .bind(&finding.evidence)
        .bind(&finding.remediation)
        .bind(Json(&finding.references))
        .bind(finding.discovered_at)
        .bind(finding.created_at)
        .bind(finding.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
