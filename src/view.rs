// Active view, panel visibility and user preferences

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use uom::si::{
    f32::{Length, Velocity},
    length::{kilometer, meter, mile},
    velocity::{kilometer_per_hour, meter_per_second, mile_per_hour},
};

use crate::{config::AppConfig, store::Store};

/// Top-level views, in the order of their numeric shortcuts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum View {
    #[default]
    Dashboard,
    DeepDive,
    Progress,
}

impl View {
    pub const ALL: [View; 3] = [View::Dashboard, View::DeepDive, View::Progress];

    /// View bound to a numeric key, `'1'` being the first.
    pub fn from_shortcut(key: char) -> Option<View> {
        let position = key.to_digit(10)?.checked_sub(1)?;
        Self::ALL.get(position as usize).copied()
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::Dashboard => write!(f, "Dashboard"),
            View::DeepDive => write!(f, "Deep Dive"),
            View::Progress => write!(f, "Progress"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    Novice,
    #[default]
    Intermediate,
    Advanced,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitPreference {
    #[default]
    Metric,
    Imperial,
}

impl UnitPreference {
    /// Convert a speed in m/s to km/h or mph.
    pub fn speed(&self, mps: f32) -> f32 {
        let velocity = Velocity::new::<meter_per_second>(mps);
        match self {
            UnitPreference::Metric => velocity.get::<kilometer_per_hour>(),
            UnitPreference::Imperial => velocity.get::<mile_per_hour>(),
        }
    }

    /// Convert a distance in meters to km or miles.
    pub fn distance(&self, meters: f32) -> f32 {
        let length = Length::new::<meter>(meters);
        match self {
            UnitPreference::Metric => length.get::<kilometer>(),
            UnitPreference::Imperial => length.get::<mile>(),
        }
    }

    pub fn speed_label(&self) -> &'static str {
        match self {
            UnitPreference::Metric => "km/h",
            UnitPreference::Imperial => "mph",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewState {
    pub active_view: View,
    /// Session drawer (session list, upload)
    pub drawer_open: bool,
    pub settings_open: bool,
    pub skill_level: SkillLevel,
    pub units: UnitPreference,
}

/// Owns the [`ViewState`] store.
#[derive(Clone, Default)]
pub struct ViewPreferences {
    store: Store<ViewState>,
}

impl ViewPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the preferences persisted in `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            store: Store::new(ViewState {
                active_view: config.last_view,
                skill_level: config.skill_level,
                units: config.units,
                ..Default::default()
            }),
        }
    }

    /// Copy the persistable preferences back into `config`.
    pub fn write_to_config(&self, config: &mut AppConfig) {
        let state = self.store.snapshot();
        config.last_view = state.active_view;
        config.skill_level = state.skill_level;
        config.units = state.units;
    }

    pub fn store(&self) -> &Store<ViewState> {
        &self.store
    }

    pub fn snapshot(&self) -> ViewState {
        self.store.snapshot()
    }

    pub fn active_view(&self) -> View {
        self.store.read(|s| s.active_view)
    }

    pub fn set_active_view(&self, view: View) {
        self.store.update(|s| {
            if s.active_view != view {
                debug!("View {} -> {}", s.active_view, view);
                s.active_view = view;
            }
        });
    }

    pub fn set_drawer_open(&self, open: bool) {
        self.store.update(|s| s.drawer_open = open);
    }

    pub fn toggle_drawer(&self) {
        self.store.update(|s| s.drawer_open = !s.drawer_open);
    }

    pub fn set_settings_open(&self, open: bool) {
        self.store.update(|s| s.settings_open = open);
    }

    pub fn set_skill_level(&self, level: SkillLevel) {
        self.store.update(|s| s.skill_level = level);
    }

    pub fn set_units(&self, units: UnitPreference) {
        self.store.update(|s| s.units = units);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_shortcuts() {
        assert_eq!(View::from_shortcut('1'), Some(View::Dashboard));
        assert_eq!(View::from_shortcut('2'), Some(View::DeepDive));
        assert_eq!(View::from_shortcut('3'), Some(View::Progress));
        assert_eq!(View::from_shortcut('0'), None);
        assert_eq!(View::from_shortcut('4'), None);
        assert_eq!(View::from_shortcut('x'), None);
    }

    #[test]
    fn test_unit_conversion() {
        let metric = UnitPreference::Metric.speed(10.);
        let imperial = UnitPreference::Imperial.speed(10.);
        assert!((metric - 36.).abs() < 0.01);
        assert!((imperial - 22.369).abs() < 0.01);
        assert!((UnitPreference::Imperial.distance(1609.344) - 1.).abs() < 0.001);
    }

    #[test]
    fn test_preferences_round_trip_through_config() {
        let mut config = AppConfig::default();
        let prefs = ViewPreferences::from_config(&config);
        prefs.set_active_view(View::Progress);
        prefs.set_skill_level(SkillLevel::Advanced);
        prefs.set_units(UnitPreference::Imperial);
        prefs.set_drawer_open(true);

        prefs.write_to_config(&mut config);
        let restored = ViewPreferences::from_config(&config).snapshot();
        assert_eq!(restored.active_view, View::Progress);
        assert_eq!(restored.skill_level, SkillLevel::Advanced);
        assert_eq!(restored.units, UnitPreference::Imperial);
        // panel flags are not persisted
        assert!(!restored.drawer_open);
    }
}
