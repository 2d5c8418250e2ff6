use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use todoist_analytics::analytics::{compute_dashboard, top_sections};
use todoist_analytics::cache::SnapshotCache;
use todoist_analytics::client::TaskSource;
use todoist_analytics::error::ClientError;
use todoist_analytics::model::{Section, Task};
use todoist_analytics::refresh::{RefreshCoordinator, RefreshEvent, run_cycle};

struct ProjectFixture;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
}

fn completed(id: &str, section_id: &str, day: u32) -> Task {
    Task {
        id: id.to_string(),
        content: Some(format!("task {id}")),
        section_id: Some(section_id.to_string()),
        completed_at: Some(format!("2026-10-{day:02}T09:00:00Z")),
    }
}

impl TaskSource for ProjectFixture {
    fn list_sections(&self, _project_id: &str) -> Result<Vec<Section>, ClientError> {
        Ok(["A", "B", "C"]
            .iter()
            .map(|name| Section {
                id: name.to_lowercase(),
                name: name.to_string(),
            })
            .collect())
    }

    fn list_active_tasks(&self, _project_id: &str) -> Result<Vec<Task>, ClientError> {
        Ok(vec![Task {
            id: "open".to_string(),
            content: None,
            section_id: Some("a".to_string()),
            completed_at: None,
        }])
    }

    fn list_completed_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>, ClientError> {
        let mut tasks = vec![
            completed("1", "a", 13),
            completed("2", "b", 13),
            completed("3", "a", 14),
            completed("4", "b", 15),
            completed("5", "c", 16),
        ];
        if project_id.is_none() {
            tasks.push(completed("other", "elsewhere", 2));
        }
        Ok(tasks)
    }
}

#[test]
fn three_section_scenario() {
    let snapshot = run_cycle(&ProjectFixture, "p1", now()).expect("cycle");
    let dashboard = compute_dashboard(&snapshot, now(), 3);

    assert_eq!(
        dashboard.monthly_counts.entries(),
        &[
            ("A".to_string(), 2),
            ("B".to_string(), 2),
            ("C".to_string(), 1),
        ]
    );
    assert_eq!(
        dashboard.top_sections,
        vec![
            ("A".to_string(), 2),
            ("B".to_string(), 2),
            ("C".to_string(), 1),
        ]
    );
    assert_eq!(dashboard.sections_without_active, vec!["B", "C"]);
    assert!(dashboard.sections_without_completions.is_empty());
    assert_eq!(dashboard.monthly_total, 5);
    assert_eq!(dashboard.weekday_counts.total(), 5);
    assert_eq!(dashboard.calendar_counts.values().sum::<usize>(), 6);
    assert_eq!(top_sections(&dashboard.monthly_counts, 1), vec![("A".to_string(), 2)]);
}

#[test]
fn cached_and_live_snapshots_render_identically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = Arc::new(SnapshotCache::new(dir.path().join("snapshot_cache.json")));
    assert!(cache.load().is_none());

    let (coordinator, events) =
        RefreshCoordinator::new(Arc::new(ProjectFixture), Arc::clone(&cache), "p1");
    assert!(coordinator.request_cycle());
    let live = match events.recv_timeout(Duration::from_secs(5)).expect("event") {
        RefreshEvent::Succeeded(snapshot) => snapshot,
        RefreshEvent::Failed(failure) => panic!("unexpected failure: {failure}"),
    };

    let restored = SnapshotCache::new(cache.path()).load().expect("cached snapshot");
    assert_eq!(&restored, live.as_ref());
    assert_eq!(
        compute_dashboard(&restored, now(), 3),
        compute_dashboard(&live, now(), 3)
    );
}
