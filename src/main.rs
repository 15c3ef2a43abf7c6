use std::{
    io::{self, BufRead},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::json;

use pitwall::{
    AppConfig, Corner, Dashboard, FileBackend, KeyEvent, MemoryBackend, PitwallError, ReportPhase,
    Resource, SessionId, UploadFile, backend::Backend,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Directory holding the data service files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Run against a seeded in-memory data service
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List sessions, auto-selecting the newest one
    Sessions,
    /// Upload telemetry files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Make sure a session has a coaching report and wait for it
    Report {
        #[arg(short, long)]
        session: Option<String>,

        #[arg(long, default_value_t = 60)]
        timeout_s: u64,
    },
    /// Ask the coach a question about a session
    Ask {
        question: String,

        #[arg(short, long)]
        session: Option<String>,
    },
    /// Delete a session
    Delete { session: String },
    /// Replay a key script read from stdin, one key per line
    Keys,
}

fn demo_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(150)));
    backend.insert(
        &Resource::Sessions,
        json!([
            {"session_id": "s0002", "track_name": "Spa-Francorchamps", "file_name": "spa.jsonl", "lap_count": 14, "best_lap_time_s": 138.4},
            {"session_id": "s0001", "track_name": "Monza", "file_name": "monza.jsonl", "lap_count": 9, "best_lap_time_s": 107.9},
        ]),
    );
    backend.insert(
        &Resource::Report(SessionId::from("s0001")),
        json!({
            "session_id": "s0001",
            "status": "ready",
            "content": "Carry more speed through Lesmo 2, you lift 20 m earlier than on your best lap.",
        }),
    );
    backend
}

/// Stand in for the processing service: finish any report still generating
/// after a few seconds.
fn spawn_demo_worker(backend: Arc<MemoryBackend>, session: SessionId) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let resource = Resource::Report(session.clone());
        let generating = backend
            .get(&resource)
            .is_some_and(|report| report["status"] == "generating");
        if generating {
            backend.insert(
                &resource,
                json!({
                    "session_id": session,
                    "status": "ready",
                    "content": "Brake references are consistent, focus on throttle pick-up out of slow corners.",
                }),
            );
        }
    });
}

fn demo_corners() -> Vec<Corner> {
    (1..=5)
        .map(|n| Corner {
            number: n,
            entry_distance_m: n as f32 * 600.,
            apex_distance_m: n as f32 * 600. + 80.,
            exit_distance_m: n as f32 * 600. + 160.,
        })
        .collect()
}

struct Context {
    dashboard: Dashboard,
    demo: Option<Arc<MemoryBackend>>,
}

fn build_context(args: &Args, config: &AppConfig) -> Result<Context, PitwallError> {
    if args.demo {
        let backend = demo_backend();
        let dashboard = Dashboard::new(config.clone(), backend.clone());
        return Ok(Context {
            dashboard,
            demo: Some(backend),
        });
    }

    let data_dir = match args.data_dir.clone().or_else(|| config.data_dir.clone()) {
        Some(dir) => dir,
        None => FileBackend::default_data_dir()?,
    };
    info!("Using data directory {:?}", data_dir);
    let backend: Arc<dyn Backend> = Arc::new(FileBackend::new(data_dir)?);
    Ok(Context {
        dashboard: Dashboard::new(config.clone(), backend),
        demo: None,
    })
}

async fn select(dashboard: &Dashboard, session: Option<String>) -> Result<(), PitwallError> {
    dashboard.refresh_sessions().await?;
    if let Some(session) = session {
        dashboard.select_session(Some(SessionId::from(session))).await;
    }
    Ok(())
}

async fn sessions(dashboard: &Dashboard) -> Result<(), PitwallError> {
    dashboard.refresh_sessions().await?;
    let state = dashboard.registry().snapshot();
    if state.sessions.is_empty() {
        println!("No sessions uploaded yet");
    }
    for session in &state.sessions {
        let marker = if state.active_session.as_ref() == Some(&session.session_id) {
            "*"
        } else {
            " "
        };
        let best = session
            .best_lap_time_s
            .map(|t| format!("{t:.3}s"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{marker} {:<8} {:<24} laps: {:<4} best: {}",
            session.session_id, session.track_name, session.lap_count, best
        );
    }
    Ok(())
}

async fn upload(dashboard: &Dashboard, paths: &[PathBuf]) -> Result<(), PitwallError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let contents =
            std::fs::read_to_string(path).map_err(|e| PitwallError::TelemetryFileError {
                path: format!("{:?}", path),
                source: e,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        files.push(UploadFile { name, contents });
    }

    // print every stage as the pipeline moves through it
    let mut updates = dashboard.registry().store().subscribe();
    let printer = tokio::spawn(async move {
        let mut last = None;
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            let stage = format!("{} {}%", state.upload_state, state.upload_progress);
            if last.as_ref() != Some(&stage) {
                println!("{stage}");
                last = Some(stage);
            }
        }
    });

    let receipt = dashboard.upload(files).await?;
    tokio::task::yield_now().await;
    printer.abort();
    match receipt {
        Some(receipt) => {
            for toast in dashboard.toasts().toasts() {
                println!("[{}] {}", toast.category, toast.message);
            }
            println!("Created sessions: {:?}", receipt.session_ids);
        }
        None => println!("Upload failed: {}", dashboard.registry().snapshot().upload_state),
    }
    Ok(())
}

async fn report(
    context: &Context,
    session: Option<String>,
    timeout: Duration,
) -> Result<(), PitwallError> {
    let dashboard = &context.dashboard;
    select(dashboard, session).await?;
    let active = dashboard
        .registry()
        .active_session()
        .ok_or(PitwallError::NoActiveSession)?;
    if let Some(backend) = &context.demo {
        spawn_demo_worker(backend.clone(), active.clone());
    }

    let mut updates = dashboard.reports().store().subscribe();
    let settled = tokio::time::timeout(timeout, async {
        loop {
            let view = updates.borrow_and_update().clone();
            match &view.phase {
                ReportPhase::Ready { .. } | ReportPhase::Failed { .. } => return view,
                phase => info!("Report for {} is {}", active, phase),
            }
            if updates.changed().await.is_err() {
                return view;
            }
        }
    })
    .await
    .map_err(|_| PitwallError::ReportTimeout {
        session: active.to_string(),
    })?;

    match settled.phase {
        ReportPhase::Ready { content } => println!("{content}"),
        phase => println!("Report for {active}: {phase}"),
    }
    Ok(())
}

async fn ask(
    dashboard: &Dashboard,
    session: Option<String>,
    question: &str,
) -> Result<(), PitwallError> {
    select(dashboard, session).await?;
    let reply = dashboard.ask_coach(question).await?;
    println!("{}: {}", reply.role, reply.content);
    Ok(())
}

async fn keys(context: &Context, config: &AppConfig) -> Result<(), PitwallError> {
    let dashboard = &context.dashboard;
    select(dashboard, None).await?;
    if context.demo.is_some() {
        dashboard.set_corners(demo_corners());
    }

    for line in io::stdin().lock().lines() {
        let line = line.map_err(|e| PitwallError::InvalidUserInput {
            field: "stdin".to_string(),
            reason: e.to_string(),
        })?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        // script lines may also switch the deep-dive mode: `mode corner`
        if let Some(mode) = line.strip_prefix("mode ") {
            let mode = serde_json::from_value(json!(mode.trim())).map_err(|_| {
                PitwallError::InvalidUserInput {
                    field: "mode".to_string(),
                    reason: format!("unknown mode '{}'", mode.trim()),
                }
            })?;
            dashboard.selection().set_mode(mode);
            println!("{line:<14} -> mode set");
            continue;
        }
        let event: KeyEvent = line.parse()?;
        let outcome = dashboard.dispatch_key(&event);
        println!("{line:<14} -> {outcome}");
    }
    tokio::time::sleep(config.question_focus_delay()).await;

    let view = dashboard.view().snapshot();
    let selection = dashboard.selection().snapshot();
    let coach = dashboard.coach().snapshot();
    println!(
        "view: {}, drawer open: {}, coach open: {} (focused {}x), corner: {}",
        view.active_view,
        view.drawer_open,
        coach.panel_open,
        coach.focus_requests,
        selection
            .selected_corner
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    let preferences = dashboard.preferences();
    if context.demo.is_none()
        && let Err(e) = preferences.save()
    {
        warn!("Could not save preferences: {}", e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), PitwallError> {
    let config = AppConfig::from_local_file().unwrap_or_default();
    let context = build_context(&args, &config)?;
    context.dashboard.start();

    let result = match args.command {
        Commands::Sessions => sessions(&context.dashboard).await,
        Commands::Upload { files } => upload(&context.dashboard, &files).await,
        Commands::Report { session, timeout_s } => {
            report(&context, session, Duration::from_secs(timeout_s)).await
        }
        Commands::Ask { question, session } => ask(&context.dashboard, session, &question).await,
        Commands::Delete { session } => {
            select(&context.dashboard, None).await?;
            context
                .dashboard
                .delete_session(&SessionId::from(session.as_str()))
                .await
        }
        Commands::Keys => keys(&context, &config).await,
    };
    context.dashboard.shutdown();
    result
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let args = Args::parse();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("Exiting...");
        std::process::exit(0);
    }) {
        warn!("Could not set Ctrl-C handler: {}", e);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| PitwallError::RuntimeError { source: e });
    let result = runtime.and_then(|runtime| runtime.block_on(run(args)));
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
