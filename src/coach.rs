// AI coach panel: visibility, chat transcript, context chips and pending question

use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    analysis::{DeepDiveMode, SelectionState},
    backend::{self, Method, Resource},
    cache::QueryCache,
    errors::PitwallError,
    session::{SessionId, SessionSummary},
    store::Store,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    /// Notes added by the dashboard itself, e.g. when the coach can't be reached
    System,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::User => write!(f, "you"),
            ChatRole::Assistant => write!(f, "coach"),
            ChatRole::System => write!(f, "pitwall"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A label/value pair describing what the coach is currently looking at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextChip {
    pub label: String,
    pub value: String,
}

impl ContextChip {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoachState {
    pub panel_open: bool,
    /// Session the transcript belongs to
    pub session: Option<SessionId>,
    /// Append-only within a session
    pub messages: Vec<ChatMessage>,
    pub chips: Vec<ContextChip>,
    pub pending_question: Option<String>,
    /// A reply from the coach is outstanding
    pub waiting: bool,
    /// Bumped every time the question field should take focus
    pub focus_requests: u64,
}

/// Build the chips describing the current session and analysis selection.
pub fn context_chips(
    session: Option<&SessionSummary>,
    selection: &SelectionState,
) -> Vec<ContextChip> {
    let mut chips = Vec::new();
    if let Some(session) = session {
        chips.push(ContextChip::new("Track", session.track_name.clone()));
    }
    match selection.selected_laps.as_slice() {
        [] => {}
        [lap] => chips.push(ContextChip::new("Lap", lap.to_string())),
        [reference, compare, ..] => {
            chips.push(ContextChip::new("Laps", format!("{reference} vs {compare}")))
        }
    }
    if selection.mode == DeepDiveMode::Corner
        && let Some(corner) = selection.selected_corner
    {
        chips.push(ContextChip::new("Corner", corner.to_string()));
    }
    if let Some(zoom) = selection.zoom {
        chips.push(ContextChip::new(
            "Zoom",
            format!("{:.0}-{:.0} m", zoom.start(), zoom.end()),
        ));
    }
    chips
}

/// Owns the [`CoachState`] store and talks to the coach endpoint.
#[derive(Clone)]
pub struct CoachChat {
    store: Store<CoachState>,
    cache: QueryCache,
}

impl CoachChat {
    pub fn new(cache: QueryCache) -> Self {
        Self {
            store: Store::default(),
            cache,
        }
    }

    pub fn store(&self) -> &Store<CoachState> {
        &self.store
    }

    pub fn snapshot(&self) -> CoachState {
        self.store.snapshot()
    }

    pub fn is_panel_open(&self) -> bool {
        self.store.read(|s| s.panel_open)
    }

    pub fn open_panel(&self) {
        self.store.update(|s| s.panel_open = true);
    }

    pub fn close_panel(&self) {
        self.store.update(|s| s.panel_open = false);
    }

    pub fn toggle_panel(&self) {
        self.store.update(|s| s.panel_open = !s.panel_open);
    }

    pub fn request_question_focus(&self) {
        self.store.update(|s| s.focus_requests += 1);
    }

    pub fn set_chips(&self, chips: Vec<ContextChip>) {
        self.store.update(|s| s.chips = chips);
    }

    pub fn append_message(&self, message: ChatMessage) {
        self.store.update(|s| s.messages.push(message));
    }

    /// Stash a question for the panel to pick up, opening the panel.
    pub fn queue_question(&self, question: impl Into<String>) {
        let question = question.into();
        debug!("Queued coach question {:?}", question);
        self.store.update(|s| {
            s.pending_question = Some(question);
            s.panel_open = true;
        });
    }

    pub fn take_pending_question(&self) -> Option<String> {
        self.store.update(|s| s.pending_question.take())
    }

    /// Start a fresh conversation for `session`. The panel keeps its visibility.
    pub fn reset_for(&self, session: Option<SessionId>) {
        self.store.update(|s| {
            if s.session != session {
                s.session = session;
                s.messages.clear();
                s.chips.clear();
                s.pending_question = None;
                s.waiting = false;
            }
        });
    }

    /// Send `question` to the coach and append the reply. A failure leaves a
    /// system note in the transcript and is returned as well.
    pub async fn ask(&self, question: &str) -> Result<ChatMessage, PitwallError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PitwallError::invalid_input("question", "empty question"));
        }
        let session = self.store.update(|s| {
            let session = s.session.clone()?;
            if s.waiting {
                return None;
            }
            s.messages.push(ChatMessage::new(ChatRole::User, question));
            s.waiting = true;
            Some(session)
        });
        let Some(session) = session else {
            return Err(if self.store.read(|s| s.waiting) {
                PitwallError::invalid_input("question", "the coach is still answering")
            } else {
                PitwallError::NoActiveSession
            });
        };

        info!("Asking the coach about {}", session);
        let resource = Resource::CoachChat(session.clone());
        let reply = self
            .cache
            .mutate(Method::Post, &resource, json!({ "question": question }))
            .await
            .map_err(|e| e.into_error(&resource))
            .and_then(|value| backend::decode::<ChatMessage>(&resource, value));

        self.store.update(|s| {
            // the user moved to another session, that transcript is gone
            if s.session.as_ref() != Some(&session) {
                debug!("Dropping coach reply for inactive session {}", session);
                return;
            }
            s.waiting = false;
            match &reply {
                Ok(message) => s.messages.push(message.clone()),
                Err(e) => s.messages.push(ChatMessage::new(
                    ChatRole::System,
                    format!("The coach is unavailable: {e}"),
                )),
            }
        });
        if let Err(e) = &reply {
            warn!("Coach request failed: {}", e);
        }
        reply
    }
}
