// Integration test for the dashboard running on the file backed data service

use std::sync::Arc;
use std::time::Duration;

use pitwall::{
    AppConfig, Dashboard, FileBackend, ReportPhase, SessionId, ToastCategory, UploadFile,
    UploadState,
};
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_file_backend_workflow() {
    // Create temporary data directory
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("data");
    let backend = Arc::new(FileBackend::new(data_dir.clone()).unwrap());
    let dashboard = Dashboard::new(AppConfig::default(), backend);

    // Nothing uploaded yet
    assert_eq!(dashboard.refresh_sessions().await.unwrap(), None);

    // Upload a session
    let file = UploadFile {
        name: "laguna.jsonl".to_string(),
        contents: "{\"track_name\":\"Laguna Seca\",\"best_lap_time_s\":84.6,\"lap_count\":11}"
            .to_string(),
    };
    let receipt = dashboard.upload(vec![file]).await.unwrap().unwrap();
    assert_eq!(receipt.session_ids, vec![SessionId::from("s0001")]);
    assert_eq!(dashboard.registry().snapshot().upload_state, UploadState::Done);
    // first lap ever on the track is a personal best
    assert_eq!(
        dashboard.toasts().toasts()[0].category,
        ToastCategory::PersonalBest
    );
    assert!(data_dir.join("sessions.json").exists());
    assert!(data_dir.join("milestones").join("laguna_seca.json").exists());

    // Listing auto-selects it and requests its report
    let selected = dashboard.refresh_sessions().await.unwrap();
    assert_eq!(selected, Some(SessionId::from("s0001")));
    let report_path = data_dir.join("reports").join("s0001.json");
    assert!(report_path.exists());
    assert_eq!(dashboard.reports().snapshot().phase, ReportPhase::Generating);

    // The processing service finishes the report
    std::fs::write(
        &report_path,
        r#"{"session_id":"s0001","status":"ready","content":"Use more curb at the Corkscrew"}"#,
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(2001)).await;
    assert_eq!(
        dashboard.reports().snapshot().phase,
        ReportPhase::Ready {
            content: "Use more curb at the Corkscrew".to_string()
        }
    );

    // Deleting the session removes its files
    dashboard
        .delete_session(&SessionId::from("s0001"))
        .await
        .unwrap();
    assert!(!report_path.exists());
    assert_eq!(dashboard.refresh_sessions().await.unwrap(), None);
    assert!(dashboard.registry().snapshot().sessions.is_empty());
}
