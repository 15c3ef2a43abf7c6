// Analysis selection: cursor, lap comparison, corner focus, deep-dive mode and zoom

pub mod corners;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{errors::PitwallError, store::Store};

pub use corners::{Corner, CornerId, NavDirection, cycle_corner};

/// Maximum number of laps compared at once (reference + compare).
pub const MAX_SELECTED_LAPS: usize = 2;

/// Focus of the deep-dive view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeepDiveMode {
    #[default]
    Speed,
    Corner,
    Custom,
}

/// Visible distance window, `start < end`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoomRange {
    start: f32,
    end: f32,
}

impl ZoomRange {
    pub fn new(start: f32, end: f32) -> Result<Self, PitwallError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(PitwallError::invalid_input("zoom", "bounds must be finite"));
        }
        if start >= end {
            return Err(PitwallError::invalid_input(
                "zoom",
                format!("start {start} must be lower than end {end}"),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> f32 {
        self.start
    }

    pub fn end(&self) -> f32 {
        self.end
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionState {
    /// Distance along the lap shared by every synchronized chart
    pub cursor_distance: Option<f32>,
    /// Reference lap first, compare lap second
    pub selected_laps: Vec<u32>,
    pub selected_corner: Option<CornerId>,
    pub mode: DeepDiveMode,
    pub zoom: Option<ZoomRange>,
}

impl SelectionState {
    pub fn reference_lap(&self) -> Option<u32> {
        self.selected_laps.first().copied()
    }

    pub fn compare_lap(&self) -> Option<u32> {
        self.selected_laps.get(1).copied()
    }
}

/// Toggle `lap` in `laps`. Selecting a new lap when the list is full evicts
/// the oldest entry, so the remaining lap moves into the reference slot.
pub fn toggle_lap(laps: &mut Vec<u32>, lap: u32) {
    if let Some(pos) = laps.iter().position(|l| *l == lap) {
        laps.remove(pos);
        return;
    }
    if laps.len() >= MAX_SELECTED_LAPS {
        laps.remove(0);
    }
    laps.push(lap);
}

/// Owns the [`SelectionState`] store. Fields are independent of each other;
/// only [`AnalysisSelection::reset`] clears more than one at a time.
#[derive(Clone, Default)]
pub struct AnalysisSelection {
    store: Store<SelectionState>,
}

impl AnalysisSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &Store<SelectionState> {
        &self.store
    }

    pub fn snapshot(&self) -> SelectionState {
        self.store.snapshot()
    }

    pub fn set_cursor_distance(&self, distance: Option<f32>) {
        self.store.update(|s| s.cursor_distance = distance);
    }

    pub fn select_lap(&self, lap: u32) {
        self.store.update(|s| toggle_lap(&mut s.selected_laps, lap));
    }

    /// Replace the lap selection, feeding each lap through the same
    /// toggle/evict rule as [`AnalysisSelection::select_lap`].
    pub fn select_laps(&self, laps: impl IntoIterator<Item = u32>) {
        let mut selected = Vec::with_capacity(MAX_SELECTED_LAPS);
        for lap in laps {
            toggle_lap(&mut selected, lap);
        }
        self.store.update(|s| s.selected_laps = selected);
    }

    pub fn select_corner(&self, corner: Option<CornerId>) {
        self.store.update(|s| s.selected_corner = corner);
    }

    pub fn set_mode(&self, mode: DeepDiveMode) {
        self.store.update(|s| s.mode = mode);
    }

    pub fn set_zoom(&self, zoom: Option<ZoomRange>) {
        self.store.update(|s| s.zoom = zoom);
    }

    /// Clear every field. Must run whenever the active session changes so
    /// laps and corners of the previous session never index into the new one.
    pub fn reset(&self) {
        debug!("Resetting analysis selection");
        self.store.replace(SelectionState::default());
    }
}
