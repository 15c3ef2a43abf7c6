// End to end scenarios for the dashboard core, driven against the in-memory
// data service with tokio's paused clock

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use pitwall::cache::QueryCache;
use pitwall::report::{ReportOrchestrator, TriggerOutcome};
use pitwall::timer::TaskScope;
use pitwall::{
    AppConfig, Backend, Corner, CornerId, Dashboard, DeepDiveMode, FetchError, Key, KeyEvent,
    KeyOutcome, MemoryBackend, Method, ReportPhase, Resource, SessionId, ToastCategory,
    UploadFile, UploadState, View,
};

fn telemetry_file(name: &str, track: &str, best_lap_s: f32) -> UploadFile {
    UploadFile {
        name: name.to_string(),
        contents: format!(
            "{}\n{{\"speed_mps\":52.1}}\n",
            json!({"track_name": track, "best_lap_time_s": best_lap_s, "lap_count": 6})
        ),
    }
}

/// Collect every distinct upload state the registry goes through.
fn record_upload_states(dashboard: &Dashboard) -> Arc<Mutex<Vec<UploadState>>> {
    let seen = Arc::new(Mutex::new(vec![UploadState::Idle]));
    let recorder = seen.clone();
    let mut updates = dashboard.registry().store().subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().upload_state.clone();
            let mut seen = recorder.lock().unwrap();
            if seen.last() != Some(&state) {
                seen.push(state);
            }
        }
    });
    seen
}

/// Data service with no reports whose generation requests hang until the
/// gate is opened.
struct GatedBackend {
    gate: Semaphore,
    posts: Mutex<HashMap<SessionId, usize>>,
}

impl GatedBackend {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            posts: Mutex::new(HashMap::new()),
        }
    }

    fn posts(&self, session: &SessionId) -> usize {
        self.posts.lock().unwrap().get(session).copied().unwrap_or(0)
    }

    fn open(&self) {
        self.gate.add_permits(16);
    }
}

#[async_trait]
impl Backend for GatedBackend {
    async fn fetch(&self, _resource: &Resource) -> Result<Value, FetchError> {
        Err(FetchError::NotFound)
    }

    async fn mutate(
        &self,
        method: Method,
        resource: &Resource,
        _body: Value,
    ) -> Result<Value, FetchError> {
        let Resource::Report(session) = resource else {
            return Err(FetchError::NotFound);
        };
        assert_eq!(method, Method::Post);
        *self.posts.lock().unwrap().entry(session.clone()).or_default() += 1;
        self.gate.acquire().await.unwrap().forget();
        Ok(json!({"session_id": session, "status": "generating"}))
    }
}

fn corners(numbers: &[u32]) -> Vec<Corner> {
    numbers
        .iter()
        .map(|n| Corner {
            number: *n,
            entry_distance_m: *n as f32 * 400.,
            apex_distance_m: *n as f32 * 400. + 50.,
            exit_distance_m: *n as f32 * 400. + 100.,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_upload_with_personal_best() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(50)));
    let dashboard = Dashboard::new(AppConfig::default(), backend.clone());
    dashboard.start();
    let states = record_upload_states(&dashboard);

    let receipt = dashboard
        .upload(vec![
            telemetry_file("spa_1.jsonl", "Spa", 141.3),
            telemetry_file("spa_2.jsonl", "Spa", 139.8),
        ])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receipt.session_ids.len(), 2);

    let toasts = dashboard.toasts().toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].category, ToastCategory::PersonalBest);
    assert!(toasts[0].message.contains("Spa"));

    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            UploadState::Idle,
            UploadState::Uploading,
            UploadState::Processing,
            UploadState::Done,
            UploadState::Idle,
        ]
    );

    // the session list was invalidated and re-fetched in the background
    let registry = dashboard.registry().snapshot();
    assert_eq!(registry.sessions.len(), 2);
    assert_eq!(registry.active_session, Some(receipt.session_ids[1].clone()));
}

#[tokio::test(start_paused = true)]
async fn test_upload_without_personal_best_gets_info_toast() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(50)));
    backend.insert(
        &Resource::Milestones {
            track: "Spa".to_string(),
        },
        json!({"track_name": "Spa", "personal_best_session": "s9999", "personal_best_lap_s": 131.0}),
    );
    let dashboard = Dashboard::new(AppConfig::default(), backend);

    dashboard
        .upload(vec![
            telemetry_file("spa_1.jsonl", "Spa", 141.3),
            telemetry_file("spa_2.jsonl", "Spa", 139.8),
        ])
        .await
        .unwrap();

    let toasts = dashboard.toasts().toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].category, ToastCategory::Info);
    assert_eq!(toasts[0].message, "Upload complete: 2 sessions added");

    // toasts dismiss themselves
    tokio::time::sleep(Duration::from_millis(5001)).await;
    assert!(dashboard.toasts().toasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_report_is_generated_once_and_polled() {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert(
        &Resource::Sessions,
        json!([{"session_id": "abc", "track_name": "Suzuka", "lap_count": 10}]),
    );
    let abc = Resource::Report(SessionId::from("abc"));
    let dashboard = Dashboard::new(AppConfig::default(), backend.clone());
    dashboard.start();

    dashboard.refresh_sessions().await.unwrap();
    tokio::task::yield_now().await;
    assert_eq!(backend.count(Some(Method::Post), &abc), 1);
    assert_eq!(backend.count(None, &abc), 1);
    assert_eq!(dashboard.reports().snapshot().phase, ReportPhase::Generating);
    assert!(dashboard.reports().is_polling());

    tokio::time::sleep(Duration::from_millis(2001)).await;
    assert_eq!(backend.count(None, &abc), 2);
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(backend.count(None, &abc), 3);

    backend.insert(
        &abc,
        json!({"session_id": "abc", "status": "ready", "content": "Smoother hands through the esses"}),
    );
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(backend.count(None, &abc), 4);
    assert_eq!(
        dashboard.reports().snapshot().phase,
        ReportPhase::Ready {
            content: "Smoother hands through the esses".to_string()
        }
    );
    assert!(!dashboard.reports().is_polling());

    // settled: nothing else goes out
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.count(None, &abc), 4);
    assert_eq!(backend.count(Some(Method::Post), &abc), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_triggers_issue_one_request() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(100)));
    let reports = ReportOrchestrator::new(QueryCache::new(backend.clone()), TaskScope::new());
    let abc = SessionId::from("abc");

    tokio::join!(
        reports.activate(Some(abc.clone())),
        reports.reconcile(),
        reports.reconcile(),
        reports.reconcile(),
        reports.reconcile(),
    );
    assert_eq!(backend.count(Some(Method::Post), &Resource::Report(abc.clone())), 1);

    // a direct trigger is deduplicated as well
    assert_eq!(reports.trigger(&abc).await, TriggerOutcome::Deduplicated);
    assert_eq!(backend.count(Some(Method::Post), &Resource::Report(abc)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_generation_is_not_repeated_across_switches() {
    let backend = Arc::new(GatedBackend::new());
    let reports = ReportOrchestrator::new(QueryCache::new(backend.clone()), TaskScope::new());
    let a = SessionId::from("a");
    let b = SessionId::from("b");
    let mut pending = Vec::new();

    // a -> b -> a while a's request is still waiting for an answer
    for session in [&a, &b, &a] {
        let reports = reports.clone();
        let session = session.clone();
        pending.push(tokio::spawn(async move { reports.activate(Some(session)).await }));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(backend.posts(&a), 1);
    assert_eq!(backend.posts(&b), 1);
    assert_eq!(reports.snapshot().phase, ReportPhase::Generating);

    backend.open();
    for task in pending {
        task.await.unwrap();
    }
    assert_eq!(backend.posts(&a), 1);
    assert_eq!(reports.snapshot().session, Some(a.clone()));
    assert_eq!(reports.snapshot().phase, ReportPhase::Generating);
    assert!(reports.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_trigger_for_background_session_keeps_active_dedup() {
    let backend = Arc::new(GatedBackend::new());
    let reports = ReportOrchestrator::new(QueryCache::new(backend.clone()), TaskScope::new());
    let a = SessionId::from("a");
    let b = SessionId::from("b");

    let active = reports.clone();
    let session = b.clone();
    let pending = tokio::spawn(async move { active.activate(Some(session)).await });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(backend.posts(&b), 1);

    // a is not on screen, so nothing goes out and b's request stays tracked
    assert_eq!(reports.trigger(&a).await, TriggerOutcome::Inactive);
    reports.reconcile().await;
    assert_eq!(reports.trigger(&b).await, TriggerOutcome::Deduplicated);
    assert_eq!(backend.posts(&a), 0);
    assert_eq!(backend.posts(&b), 1);

    backend.open();
    pending.await.unwrap();
    assert_eq!(backend.posts(&b), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_switch_tracks_reports_independently() {
    let backend = Arc::new(MemoryBackend::new());
    let reports = ReportOrchestrator::new(QueryCache::new(backend.clone()), TaskScope::new());
    let a = SessionId::from("a");
    let b = SessionId::from("b");

    reports.activate(Some(a.clone())).await;
    reports.activate(Some(b.clone())).await;
    assert_eq!(backend.count(Some(Method::Post), &Resource::Report(a.clone())), 1);
    assert_eq!(backend.count(Some(Method::Post), &Resource::Report(b.clone())), 1);

    // back on a: its report exists now, so nothing is re-requested
    reports.activate(Some(a.clone())).await;
    assert_eq!(backend.count(Some(Method::Post), &Resource::Report(a)), 1);
    assert_eq!(reports.snapshot().phase, ReportPhase::Generating);
}

#[tokio::test(start_paused = true)]
async fn test_late_report_is_cached_but_not_shown() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(100)));
    let cache = QueryCache::new(backend.clone());
    let reports = ReportOrchestrator::new(cache.clone(), TaskScope::new());
    let a = SessionId::from("a");
    let b = SessionId::from("b");
    backend.insert(
        &Resource::Report(b.clone()),
        json!({"session_id": "b", "status": "ready", "content": "b report"}),
    );

    // a's generation request is in flight when the user moves to b
    let slow = reports.clone();
    let first = a.clone();
    let in_flight = tokio::spawn(async move { slow.activate(Some(first)).await });
    tokio::time::sleep(Duration::from_millis(150)).await;
    reports.activate(Some(b.clone())).await;
    in_flight.await.unwrap();

    let view = reports.snapshot();
    assert_eq!(view.session, Some(b));
    assert_eq!(
        view.phase,
        ReportPhase::Ready {
            content: "b report".to_string()
        }
    );
    assert!(cache.peek(&Resource::Report(a.clone())).is_some());

    // coming back shows the cached answer straight away
    let back = reports.clone();
    let revisit = tokio::spawn(async move { back.activate(Some(a)).await });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(reports.snapshot().phase, ReportPhase::Generating);
    revisit.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_corner_navigation_from_no_selection() {
    let dashboard = Dashboard::new(AppConfig::default(), Arc::new(MemoryBackend::new()));
    dashboard.set_corners(corners(&[1, 2, 3]));

    assert_eq!(
        dashboard.dispatch_key(&KeyEvent::new(Key::Digit('2'))),
        KeyOutcome::ViewSelected(View::DeepDive)
    );
    dashboard.selection().set_mode(DeepDiveMode::Corner);
    assert_eq!(dashboard.selection().snapshot().selected_corner, None);

    // with nothing selected, next lands on the first corner
    assert_eq!(
        dashboard.dispatch_key(&KeyEvent::new(Key::ArrowRight)),
        KeyOutcome::CornerSelected(CornerId(1))
    );
    dashboard.dispatch_key(&KeyEvent::new(Key::ArrowRight));
    dashboard.dispatch_key(&KeyEvent::new(Key::ArrowRight));
    assert_eq!(
        dashboard.dispatch_key(&KeyEvent::new(Key::ArrowRight)),
        KeyOutcome::CornerSelected(CornerId(1))
    );

    // and previous from nothing lands on the last one
    dashboard.selection().select_corner(None);
    assert_eq!(
        dashboard.dispatch_key(&KeyEvent::new(Key::ArrowLeft)),
        KeyOutcome::CornerSelected(CornerId(3))
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_timers() {
    let backend = Arc::new(MemoryBackend::new());
    let dashboard = Dashboard::new(AppConfig::default(), backend.clone());
    dashboard.select_session(Some(SessionId::from("abc"))).await;
    assert!(dashboard.reports().is_polling());

    dashboard.shutdown();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.count(None, &Resource::Report(SessionId::from("abc"))), 1);
}
