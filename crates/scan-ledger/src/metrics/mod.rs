use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;

/// Group counts keyed by the stored label. Labels with no rows are absent.
pub type Counts = BTreeMap<String, i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Status,
    ScanType,
}

impl GroupField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::ScanType => "scan_type",
        }
    }
}

/// The three group-bys behind [`Metrics`], read from one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricCounts {
    pub by_status: Counts,
    pub by_type: Counts,
    pub by_severity: Counts,
}

/// Totals owned by the security-event subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventTotals {
    pub events_total: i64,
    pub threats_blocked: i64,
}

#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn totals(&self) -> Result<EventTotals>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub scans_total: i64,
    pub events_total: i64,
    pub threats_blocked: i64,
    pub by_type: Counts,
    pub by_severity: Counts,
}

impl Metrics {
    pub fn aggregate(
        by_status: &Counts,
        by_type: Counts,
        by_severity: Counts,
        events: Option<EventTotals>,
    ) -> Self {
        let events = events.unwrap_or_default();
        Self {
            scans_total: by_status.values().sum(),
            events_total: events.events_total,
            threats_blocked: events.threats_blocked,
            by_type,
            by_severity,
        }
    }
}
