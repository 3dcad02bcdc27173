use std::{sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, TimeZone, Utc};
use scan_ledger::{
    clock::ManualClock,
    db,
    lifecycle::Transition,
    models::{JobStatus, NewFinding, ScanJob},
    query::{JobFilter, ListRequest, PageRequest, ScanQuery},
    service::{RequestContext, ScanService},
    store::{ScanStore, SqliteScanStore},
    ScanError,
};
use uuid::Uuid;

struct Harness {
    service: ScanService,
    store: Arc<SqliteScanStore>,
    clock: Arc<ManualClock>,
    ctx: RequestContext,
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 9, 0, 0).unwrap()
}

async fn harness() -> Harness {
    let pool = db::memory_pool().await.expect("memory pool");
    let store = Arc::new(SqliteScanStore::new(pool));
    let clock = Arc::new(ManualClock::new(epoch()));
    let service = ScanService::new(store.clone(), clock.clone());
    Harness {
        service,
        store,
        clock,
        ctx: RequestContext::new(StdDuration::from_secs(5)),
    }
}

impl Harness {
    async fn create(&self, target: &str, scan_type: &str) -> Uuid {
        self.clock.advance(Duration::seconds(1));
        self.service
            .create_job(&self.ctx, target, scan_type, None)
            .await
            .expect("create job")
            .id
    }

    async fn set(&self, id: Uuid, status: &str) {
        self.clock.advance(Duration::seconds(1));
        self.service
            .update_status(&self.ctx, id, status, None)
            .await
            .expect("update status");
    }
}

#[tokio::test]
async fn nmap_job_walks_through_its_lifecycle() {
    let h = harness().await;
    let created = h
        .service
        .create_job(&h.ctx, "10.0.0.1", "nmap", None)
        .await
        .unwrap();
    assert_eq!(created.status, JobStatus::Pending);
    assert!(created.started_at.is_none() && created.completed_at.is_none());

    h.clock.advance(Duration::seconds(5));
    let running = h
        .service
        .update_status(&h.ctx, created.id, "running", None)
        .await
        .unwrap();
    assert_eq!(running.started_at, Some(epoch() + Duration::seconds(5)));
    assert!(running.completed_at.is_none());
    assert!(running.duration.is_none());

    h.clock.advance(Duration::seconds(90));
    h.service
        .update_status(&h.ctx, created.id, "completed", None)
        .await
        .unwrap();

    let detail = h.service.get_job(&h.ctx, created.id).await.unwrap();
    assert_eq!(detail.job.status, JobStatus::Completed);
    assert_eq!(detail.job.completed_at, Some(epoch() + Duration::seconds(95)));
    assert_eq!(detail.job.duration.as_deref(), Some("1m 30s"));
    assert!(detail.findings.is_empty());

    let metrics = h.service.metrics(&h.ctx).await.unwrap();
    assert!(metrics.scans_total >= 1);
    assert!(metrics.by_type["nmap"] >= 1);
    assert_eq!(metrics.events_total, 0);
}

#[tokio::test]
async fn repeated_running_keeps_the_first_start() {
    let h = harness().await;
    let id = h.create("scanme.example", "nuclei").await;
    h.set(id, "running").await;
    let first = h.store.get_by_id(id).await.unwrap().unwrap().started_at;
    h.set(id, "running").await;
    let second = h.store.get_by_id(id).await.unwrap().unwrap().started_at;
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn completed_at_is_set_once_across_finishes() {
    let h = harness().await;
    for (first, second) in [("completed", "failed"), ("failed", "completed")] {
        let id = h.create("a.example", "amass").await;
        h.set(id, first).await;
        let stamped = h.store.get_by_id(id).await.unwrap().unwrap().completed_at;
        h.set(id, second).await;
        let job = h.store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.completed_at, stamped);
        assert_eq!(job.status.as_str(), second);
    }
}

#[tokio::test]
async fn failure_records_its_message() {
    let h = harness().await;
    let id = h.create("b.example", "custom").await;
    let view = h
        .service
        .update_status(&h.ctx, id, "failed", Some("template crashed".into()))
        .await
        .unwrap();
    assert_eq!(view.error_message.as_deref(), Some("template crashed"));
    assert!(view.completed_at.is_some());

    let err = h
        .service
        .update_status(&h.ctx, id, "running", Some("nope".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Validation(_)));

    h.set(id, "completed").await;
    let detail = h.service.get_job(&h.ctx, id).await.unwrap();
    assert_eq!(detail.job.status, JobStatus::Completed);
    assert_eq!(detail.job.error_message, None);
}

#[tokio::test]
async fn second_page_of_completed_jobs() {
    let h = harness().await;
    for i in 0..3 {
        let id = h.create(&format!("10.0.1.{i}"), "nmap").await;
        h.set(id, "completed").await;
    }
    h.create("10.0.1.99", "nmap").await;

    let page = h
        .service
        .list_jobs(
            &h.ctx,
            ScanQuery {
                status: Some("completed".into()),
                page: Some(2),
                page_size: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.total_count, 3);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.page, 2);
    // Newest first: page 2 of 3 is the middle job.
    assert_eq!(page.data[0].target, "10.0.1.1");
}

#[tokio::test]
async fn total_count_matches_unpaginated_results_for_every_filter() {
    let h = harness().await;
    let plan = [
        ("10.0.0.1", "nmap", Some("completed")),
        ("10.0.0.2", "nmap", Some("running")),
        ("app.example.com", "nuclei", Some("completed")),
        ("App.Example.com", "nuclei", None),
        ("example.org", "amass", Some("failed")),
        ("example.org", "custom", Some("cancelled")),
        ("10.0.0.3", "nmap", Some("completed")),
    ];
    let mut deleted = None;
    for (target, scan_type, status) in plan {
        let id = h.create(target, scan_type).await;
        if let Some(status) = status {
            h.set(id, status).await;
        }
        deleted.get_or_insert(id);
    }
    h.service
        .delete_job(&h.ctx, deleted.unwrap())
        .await
        .unwrap();

    let all: Vec<ScanJob> = {
        let (jobs, _) = h
            .store
            .list(&ListRequest {
                filter: JobFilter::default(),
                page: PageRequest { page: 1, page_size: 100 },
            })
            .await
            .unwrap();
        jobs
    };

    let filters = [
        ScanQuery::default(),
        ScanQuery {
            status: Some("completed".into()),
            ..Default::default()
        },
        ScanQuery {
            scan_type: Some("nmap".into()),
            ..Default::default()
        },
        ScanQuery {
            target: Some("example".into()),
            ..Default::default()
        },
        ScanQuery {
            target: Some("App".into()),
            ..Default::default()
        },
        ScanQuery {
            status: Some("completed".into()),
            scan_type: Some("nuclei".into()),
            target: Some("app".into()),
            ..Default::default()
        },
        ScanQuery {
            status: Some("pending".into()),
            scan_type: Some("amass".into()),
            ..Default::default()
        },
    ];

    for filter in filters {
        let request = filter.clone().validate().unwrap();
        let expected = all.iter().filter(|j| request.filter.matches(j)).count() as u64;

        let mut seen = 0;
        let mut page_no = 1;
        loop {
            let page = h
                .service
                .list_jobs(
                    &h.ctx,
                    ScanQuery {
                        page: Some(page_no),
                        page_size: Some(2),
                        ..filter.clone()
                    },
                )
                .await
                .unwrap();
            assert_eq!(page.total_count, expected, "filter {filter:?}");
            assert_eq!(page.total_pages, expected.div_ceil(2));
            if page.data.is_empty() {
                break;
            }
            seen += page.data.len() as u64;
            page_no += 1;
        }
        assert_eq!(seen, expected, "filter {filter:?}");
    }
}

#[tokio::test]
async fn empty_listing_has_zero_pages() {
    let h = harness().await;
    let page = h.service.list_jobs(&h.ctx, ScanQuery::default()).await.unwrap();
    assert_eq!(page.total_count, 0);
    assert_eq!(page.total_pages, 0);
    assert!(page.data.is_empty());
    assert_eq!((page.page, page.page_size), (1, 10));
}

#[tokio::test]
async fn deleted_jobs_vanish_from_queries_but_keep_their_row() {
    let h = harness().await;
    let id = h.create("gone.example", "nmap").await;
    h.service.delete_job(&h.ctx, id).await.unwrap();

    let err = h.service.get_job(&h.ctx, id).await.unwrap_err();
    assert!(matches!(err, ScanError::NotFound(_)));
    let page = h.service.list_jobs(&h.ctx, ScanQuery::default()).await.unwrap();
    assert!(page.data.iter().all(|j| j.id != id));
    assert!(h.store.exists(id).await.unwrap());

    let err = h.service.delete_job(&h.ctx, id).await.unwrap_err();
    assert!(matches!(err, ScanError::NotFound(_)));
    let err = h.service.update_status(&h.ctx, id, "running", None).await.unwrap_err();
    assert!(matches!(err, ScanError::NotFound(_)));

    h.service.purge_job(&h.ctx, id).await.unwrap();
    assert!(!h.store.exists(id).await.unwrap());
    let err = h.service.purge_job(&h.ctx, id).await.unwrap_err();
    assert!(matches!(err, ScanError::NotFound(_)));
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness().await;
    let id = Uuid::new_v4();
    assert!(matches!(
        h.service.get_job(&h.ctx, id).await,
        Err(ScanError::NotFound(_))
    ));
    assert!(matches!(
        h.service.update_status(&h.ctx, id, "completed", None).await,
        Err(ScanError::NotFound(_))
    ));
    assert!(matches!(
        h.service
            .add_finding(
                &h.ctx,
                id,
                NewFinding {
                    severity: "low".into(),
                    title: "x".into(),
                    ..Default::default()
                }
            )
            .await,
        Err(ScanError::NotFound(_))
    ));
}

#[tokio::test]
async fn findings_show_up_in_detail_and_severity_metrics() {
    let h = harness().await;
    let id = h.create("shop.example", "nuclei").await;
    for (severity, title) in [
        ("critical", "SQL injection"),
        ("low", "Missing header"),
        ("critical", "RCE"),
    ] {
        h.service
            .add_finding(
                &h.ctx,
                id,
                NewFinding {
                    severity: severity.into(),
                    title: title.into(),
                    host: Some("shop.example".into()),
                    cve_id: Some("CVE-2024-0001".into()),
                    evidence: Some(r#"{"request":"GET /"}"#.into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let detail = h.service.get_job(&h.ctx, id).await.unwrap();
    assert_eq!(detail.findings.len(), 3);
    assert_eq!(detail.findings[0].severity_score, 5);
    assert_eq!(detail.findings[2].severity_score, 2);

    let metrics = h.service.metrics(&h.ctx).await.unwrap();
    assert_eq!(metrics.by_severity["critical"], 2);
    assert_eq!(metrics.by_severity["low"], 1);
    assert!(!metrics.by_severity.contains_key("info"));

    let err = h
        .service
        .add_finding(
            &h.ctx,
            id,
            NewFinding {
                severity: "urgent".into(),
                title: "bad".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Validation(_)));
}

#[tokio::test]
async fn concurrent_starts_keep_a_single_started_at() {
    let h = harness().await;
    let id = h.create("race.example", "nmap").await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = h.store.clone();
        handles.push(tokio::spawn(async move {
            let transition =
                Transition::plan(JobStatus::Running, None, epoch() + Duration::seconds(100 + i))
                    .unwrap();
            store.update(id, &transition).await.unwrap().unwrap()
        }));
    }
    let mut stamps = Vec::new();
    for handle in handles {
        stamps.push(handle.await.unwrap().started_at.unwrap());
    }

    let first = stamps[0];
    assert!(stamps.iter().all(|s| *s == first));
    let stored = h.store.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.started_at, Some(first));
}
