// Corner identifiers and cyclic navigation through a corner collection

use std::{fmt, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::errors::PitwallError;

/// Corner identifier, displayed and serialized as `T<number>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CornerId(pub u32);

impl CornerId {
    pub fn number(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CornerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl FromStr for CornerId {
    type Err = PitwallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('T')
            .and_then(|n| n.parse::<u32>().ok())
            .map(CornerId)
            .ok_or_else(|| {
                PitwallError::invalid_input("corner", format!("'{s}' is not of the form T<number>"))
            })
    }
}

impl TryFrom<String> for CornerId {
    type Error = PitwallError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CornerId> for String {
    fn from(value: CornerId) -> Self {
        value.to_string()
    }
}

/// A corner as delivered by the analysis service, with its markers
/// expressed as distance from the start/finish line in meters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    pub number: u32,
    pub entry_distance_m: f32,
    pub apex_distance_m: f32,
    pub exit_distance_m: f32,
}

impl Corner {
    pub fn id(&self) -> CornerId {
        CornerId(self.number)
    }

    pub fn contains_distance(&self, distance_m: f32) -> bool {
        distance_m >= self.entry_distance_m && distance_m <= self.exit_distance_m
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavDirection {
    Previous,
    Next,
}

/// Step through `corners` in ascending number order, wrapping at both ends.
///
/// With no selection (or a selection not present in the collection) the
/// cursor sits before the first corner: `Next` lands on the first corner and
/// `Previous` lands on the last one. Returns `None` only for an empty
/// collection.
pub fn cycle_corner(
    corners: &[Corner],
    current: Option<CornerId>,
    direction: NavDirection,
) -> Option<CornerId> {
    let numbers: Vec<u32> = corners.iter().map(|c| c.number).sorted().dedup().collect();
    if numbers.is_empty() {
        return None;
    }
    let last = numbers.len() - 1;
    let current_idx = current.and_then(|id| numbers.iter().position(|n| *n == id.number()));

    let next_idx = match (direction, current_idx) {
        (NavDirection::Next, Some(idx)) if idx < last => idx + 1,
        (NavDirection::Next, _) => 0,
        (NavDirection::Previous, Some(idx)) if idx > 0 => idx - 1,
        (NavDirection::Previous, _) => last,
    };
    Some(CornerId(numbers[next_idx]))
}
