// Global keyboard shortcuts

use std::{fmt, str::FromStr, time::Duration};

use log::debug;

use crate::{
    analysis::{AnalysisSelection, Corner, CornerId, DeepDiveMode, NavDirection, cycle_corner},
    coach::CoachChat,
    config::QUESTION_FOCUS_DELAY_MS,
    errors::PitwallError,
    store::Store,
    timer::TaskScope,
    view::{View, ViewPreferences},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Digit(char),
    Escape,
    /// `?`, opens the coach
    Question,
    ArrowLeft,
    ArrowRight,
    Other(char),
}

/// Where the key was typed. Shortcuts stay out of the way of text entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventTarget {
    TextInput,
    #[default]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub target: EventTarget,
}

impl KeyEvent {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            target: EventTarget::Other,
        }
    }

    pub fn in_text_input(key: Key) -> Self {
        Self {
            key,
            target: EventTarget::TextInput,
        }
    }
}

/// Parses the key names used by key scripts: `1`, `Escape`, `?`,
/// `ArrowLeft`, `ArrowRight`, or any single character. An `input:` prefix
/// marks the key as typed into a text field.
impl FromStr for KeyEvent {
    type Err = PitwallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (target, name) = match s.strip_prefix("input:") {
            Some(name) => (EventTarget::TextInput, name),
            None => (EventTarget::Other, s),
        };
        let key = match name {
            "Escape" | "Esc" => Key::Escape,
            "?" => Key::Question,
            "ArrowLeft" | "Left" => Key::ArrowLeft,
            "ArrowRight" | "Right" => Key::ArrowRight,
            _ => {
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_digit() => Key::Digit(c),
                    (Some(c), None) => Key::Other(c),
                    _ => {
                        return Err(PitwallError::invalid_input(
                            "key",
                            format!("unknown key '{name}'"),
                        ));
                    }
                }
            }
        };
        Ok(KeyEvent { key, target })
    }
}

/// What a key press did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Typed into a text field, left alone
    Suppressed,
    ViewSelected(View),
    DrawerClosed,
    CoachClosed,
    /// Coach panel is open and the question field will take focus shortly
    CoachOpened,
    CornerSelected(CornerId),
    Ignored,
}

impl fmt::Display for KeyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOutcome::Suppressed => write!(f, "suppressed (text input)"),
            KeyOutcome::ViewSelected(view) => write!(f, "view -> {view}"),
            KeyOutcome::DrawerClosed => write!(f, "drawer closed"),
            KeyOutcome::CoachClosed => write!(f, "coach closed"),
            KeyOutcome::CoachOpened => write!(f, "coach opened"),
            KeyOutcome::CornerSelected(corner) => write!(f, "corner -> {corner}"),
            KeyOutcome::Ignored => write!(f, "ignored"),
        }
    }
}

/// Routes key presses to the stores they act on.
#[derive(Clone)]
pub struct KeyboardController {
    view: ViewPreferences,
    coach: CoachChat,
    selection: AnalysisSelection,
    corners: Store<Vec<Corner>>,
    scope: TaskScope,
    focus_delay: Duration,
}

impl KeyboardController {
    pub fn new(
        view: ViewPreferences,
        coach: CoachChat,
        selection: AnalysisSelection,
        corners: Store<Vec<Corner>>,
        scope: TaskScope,
    ) -> Self {
        Self {
            view,
            coach,
            selection,
            corners,
            scope,
            focus_delay: Duration::from_millis(QUESTION_FOCUS_DELAY_MS),
        }
    }

    pub fn with_focus_delay(mut self, focus_delay: Duration) -> Self {
        self.focus_delay = focus_delay;
        self
    }

    pub fn dispatch(&self, event: &KeyEvent) -> KeyOutcome {
        if event.target == EventTarget::TextInput && event.key != Key::Escape {
            return KeyOutcome::Suppressed;
        }

        let outcome = match event.key {
            Key::Digit(digit) => match View::from_shortcut(digit) {
                Some(view) => {
                    self.view.set_active_view(view);
                    KeyOutcome::ViewSelected(view)
                }
                None => KeyOutcome::Ignored,
            },
            Key::Escape => self.cancel(),
            Key::Question => self.open_coach(),
            Key::ArrowLeft => self.navigate_corner(NavDirection::Previous),
            Key::ArrowRight => self.navigate_corner(NavDirection::Next),
            Key::Other(_) => KeyOutcome::Ignored,
        };
        debug!("Key {:?}: {}", event.key, outcome);
        outcome
    }

    /// Close the topmost panel, one per press.
    fn cancel(&self) -> KeyOutcome {
        if self.view.snapshot().drawer_open {
            self.view.set_drawer_open(false);
            KeyOutcome::DrawerClosed
        } else if self.coach.is_panel_open() {
            self.coach.close_panel();
            KeyOutcome::CoachClosed
        } else {
            KeyOutcome::Ignored
        }
    }

    fn open_coach(&self) -> KeyOutcome {
        self.coach.open_panel();
        // the question field only exists once the panel has mounted
        let coach = self.coach.clone();
        self.scope.schedule(self.focus_delay, async move {
            coach.request_question_focus();
        });
        KeyOutcome::CoachOpened
    }

    fn navigate_corner(&self, direction: NavDirection) -> KeyOutcome {
        if self.view.active_view() != View::DeepDive {
            return KeyOutcome::Ignored;
        }
        let selection = self.selection.snapshot();
        if selection.mode != DeepDiveMode::Corner {
            return KeyOutcome::Ignored;
        }
        let next = self
            .corners
            .read(|corners| cycle_corner(corners, selection.selected_corner, direction));
        match next {
            Some(corner) => {
                self.selection.select_corner(Some(corner));
                KeyOutcome::CornerSelected(corner)
            }
            None => KeyOutcome::Ignored,
        }
    }
}
