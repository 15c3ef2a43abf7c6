// Dashboard composition root: builds every store and wires the reconciliations between them

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    analysis::{AnalysisSelection, Corner},
    backend::{Backend, Resource, UploadFile},
    cache::QueryCache,
    coach::{ChatMessage, CoachChat, context_chips},
    config::AppConfig,
    errors::PitwallError,
    keyboard::{KeyEvent, KeyOutcome, KeyboardController},
    report::ReportOrchestrator,
    session::{SessionId, SessionRegistry},
    store::Store,
    timer::TaskScope,
    toast::ToastQueue,
    upload::{UploadPipeline, UploadReceipt},
    view::ViewPreferences,
};

/// Resets everything that belongs to a session when the active session
/// changes. Runs at most once per change, whichever path notices it first.
#[derive(Clone)]
struct SessionSwitch {
    registry: SessionRegistry,
    selection: AnalysisSelection,
    corners: Store<Vec<Corner>>,
    coach: CoachChat,
    reports: ReportOrchestrator,
    current: Arc<Mutex<Option<SessionId>>>,
}

impl SessionSwitch {
    async fn apply(&self, session: Option<SessionId>) {
        {
            let Ok(mut current) = self.current.lock() else {
                return;
            };
            if *current == session {
                return;
            }
            *current = session.clone();
        }

        info!("Switching dashboard to session {:?}", session);
        self.selection.reset();
        self.corners.replace(Vec::new());
        self.coach.reset_for(session.clone());
        self.refresh_chips();
        self.reports.activate(session).await;
    }

    fn refresh_chips(&self) {
        let registry = self.registry.snapshot();
        let chips = context_chips(registry.active_summary(), &self.selection.snapshot());
        self.coach.set_chips(chips);
    }
}

/// Owns every store of the dashboard along with the tasks that keep them
/// consistent. Dropping the dashboard cancels all of its timers.
pub struct Dashboard {
    config: AppConfig,
    cache: QueryCache,
    scope: TaskScope,
    registry: SessionRegistry,
    view: ViewPreferences,
    selection: AnalysisSelection,
    corners: Store<Vec<Corner>>,
    coach: CoachChat,
    toasts: ToastQueue,
    uploads: UploadPipeline,
    reports: ReportOrchestrator,
    keyboard: KeyboardController,
    switch: SessionSwitch,
}

impl Dashboard {
    pub fn new(config: AppConfig, backend: Arc<dyn Backend>) -> Self {
        let scope = TaskScope::new();
        let cache = QueryCache::new(backend);
        let registry = SessionRegistry::new();
        let view = ViewPreferences::from_config(&config);
        let selection = AnalysisSelection::new();
        let corners = Store::default();
        let coach = CoachChat::new(cache.clone());
        let toasts = ToastQueue::with_default_duration(scope.clone(), config.toast_duration());
        let uploads = UploadPipeline::new(
            registry.clone(),
            cache.clone(),
            toasts.clone(),
            scope.clone(),
        )
        .with_reset_delays(config.upload_done_reset(), config.upload_error_reset());
        let reports = ReportOrchestrator::new(cache.clone(), scope.clone())
            .with_poll_interval(config.report_poll_interval());
        let keyboard = KeyboardController::new(
            view.clone(),
            coach.clone(),
            selection.clone(),
            corners.clone(),
            scope.clone(),
        )
        .with_focus_delay(config.question_focus_delay());
        let switch = SessionSwitch {
            registry: registry.clone(),
            selection: selection.clone(),
            corners: corners.clone(),
            coach: coach.clone(),
            reports: reports.clone(),
            current: Arc::new(Mutex::new(None)),
        };

        Self {
            config,
            cache,
            scope,
            registry,
            view,
            selection,
            corners,
            coach,
            toasts,
            uploads,
            reports,
            keyboard,
            switch,
        }
    }

    /// Start the background reconciliation tasks. Must be called from within
    /// a tokio runtime.
    pub fn start(&self) {
        self.scope.spawn(watch_active_session(
            self.registry.clone(),
            self.switch.clone(),
        ));
        self.scope.spawn(watch_session_list(
            self.cache.clone(),
            self.registry.clone(),
        ));
    }

    pub fn shutdown(&self) {
        info!("Shutting down dashboard");
        self.scope.shutdown();
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn view(&self) -> &ViewPreferences {
        &self.view
    }

    pub fn selection(&self) -> &AnalysisSelection {
        &self.selection
    }

    pub fn corners(&self) -> &Store<Vec<Corner>> {
        &self.corners
    }

    pub fn coach(&self) -> &CoachChat {
        &self.coach
    }

    pub fn toasts(&self) -> &ToastQueue {
        &self.toasts
    }

    pub fn reports(&self) -> &ReportOrchestrator {
        &self.reports
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Fetch the session list, auto-selecting the newest session when none
    /// is active.
    pub async fn refresh_sessions(&self) -> Result<Option<SessionId>, PitwallError> {
        let selected = self.registry.refresh(&self.cache).await?;
        if selected.is_some() {
            self.switch.apply(selected.clone()).await;
        }
        Ok(selected)
    }

    pub async fn select_session(&self, session: Option<SessionId>) {
        self.registry.set_active_session(session.clone());
        self.switch.apply(session).await;
    }

    pub async fn delete_session(&self, session: &SessionId) -> Result<(), PitwallError> {
        self.registry.delete_session(&self.cache, session).await?;
        let active = self.registry.active_session();
        self.switch.apply(active).await;
        Ok(())
    }

    pub async fn upload(
        &self,
        files: Vec<UploadFile>,
    ) -> Result<Option<UploadReceipt>, PitwallError> {
        self.uploads.submit(files).await
    }

    /// Corners of the active session, as delivered by the analysis service.
    pub fn set_corners(&self, corners: Vec<Corner>) {
        debug!("Loaded {} corners", corners.len());
        self.corners.replace(corners);
    }

    pub fn dispatch_key(&self, event: &KeyEvent) -> KeyOutcome {
        let outcome = self.keyboard.dispatch(event);
        if matches!(outcome, KeyOutcome::CornerSelected(_)) {
            self.switch.refresh_chips();
        }
        outcome
    }

    /// Refresh the chips after selection changes made outside the keyboard.
    pub fn refresh_coach_context(&self) {
        self.switch.refresh_chips();
    }

    pub async fn ask_coach(&self, question: &str) -> Result<ChatMessage, PitwallError> {
        self.coach.ask(question).await
    }

    /// The loaded config with the current preferences folded in.
    pub fn preferences(&self) -> AppConfig {
        let mut config = self.config.clone();
        self.view.write_to_config(&mut config);
        config
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.scope.shutdown();
    }
}

async fn watch_active_session(registry: SessionRegistry, switch: SessionSwitch) {
    let mut updates = registry.store().subscribe();
    loop {
        if updates.changed().await.is_err() {
            return;
        }
        let active = updates.borrow_and_update().active_session.clone();
        switch.apply(active).await;
    }
}

/// Re-fetch the session list every time it is invalidated.
async fn watch_session_list(cache: QueryCache, registry: SessionRegistry) {
    let mut invalidations = cache.subscribe_invalidations();
    loop {
        match invalidations.recv().await {
            Ok(Resource::Sessions) => {
                if let Err(e) = registry.refresh(&cache).await {
                    warn!("Could not refresh sessions: {}", e);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                debug!("Missed {} invalidations, refreshing sessions", missed);
                if let Err(e) = registry.refresh(&cache).await {
                    warn!("Could not refresh sessions: {}", e);
                }
            }
            Err(RecvError::Closed) => return,
        }
    }
}
