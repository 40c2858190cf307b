//! Single-sheet packing strategies.
//!
//! Every packer takes one usable sheet, a kerf and the pending instances, and
//! returns the placements it managed plus whatever is left over. Kerf is
//! trailing clearance: each footprint claims `kerf` extra on its right and
//! bottom, and the sheet itself is grown by `kerf` so panels may touch the far
//! edges.

pub mod best_fit;
pub mod bottom_left;
pub mod column;
pub mod strip;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cuts::CutAxis;
use crate::types::{PanelInstance, PlacedPanel, Rect};

pub use best_fit::{BestAreaFitPacker, FitHeuristic};
pub use bottom_left::BottomLeftPacker;
pub use column::{ColumnPacker, ColumnVariant};
pub use strip::{StripDirection, StripPacker};

/// Relative height difference treated as an exact strip match.
pub const EXACT_MATCH_TOLERANCE: f64 = 0.02;
/// Relative height difference a panel may fall short of its strip by.
pub const STRIP_MATCH_TOLERANCE: f64 = 0.10;
/// How much narrower than a cutsaw column a panel may be, in mm.
pub const CUTSAW_WIDTH_TOLERANCE: u32 = 5;
/// Areas closer than this (mm²) are ordered by longest side instead.
pub const AREA_SIMILARITY_MM2: u64 = 10_000;

pub trait SheetPacker: Send + Sync {
    fn pack(&self, sheet: Rect, kerf: u32, instances: &[PanelInstance]) -> PackOutcome;
}

#[derive(Debug, Clone, Default)]
pub struct PackOutcome {
    pub placed: Vec<PlacedPanel>,
    /// Unplaced instances, in the order they were passed in.
    pub remaining: Vec<PanelInstance>,
}

impl PackOutcome {
    pub fn new(placed: Vec<PlacedPanel>, instances: &[PanelInstance]) -> Self {
        let ids: HashSet<&str> = placed.iter().map(|p| p.instance_id.as_str()).collect();
        let remaining = instances
            .iter()
            .filter(|i| !ids.contains(i.id.as_str()))
            .cloned()
            .collect();
        Self { placed, remaining }
    }

    pub fn used_area(&self) -> u64 {
        self.placed.iter().map(PlacedPanel::area).sum()
    }
}

/// A positioned rectangle on a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub rect: Rect,
}

impl Region {
    pub fn new(x: u32, y: u32, rect: Rect) -> Self {
        Self { x, y, rect }
    }

    pub fn right(&self) -> u32 {
        self.x + self.rect.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.rect.h
    }

    /// Interiors overlap; touching edges do not count.
    pub fn intersects(&self, other: &Region) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains(&self, other: &Region) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Area descending, ties broken by taller aspect first.
pub(crate) fn by_area_then_aspect(a: &PanelInstance, b: &PanelInstance) -> std::cmp::Ordering {
    b.area().cmp(&a.area()).then_with(|| {
        let lhs = b.size.h as u64 * a.size.w as u64;
        let rhs = a.size.h as u64 * b.size.w as u64;
        lhs.cmp(&rhs)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Strategy {
    BottomLeft,
    BestAreaFit {
        #[serde(default)]
        heuristic: FitHeuristic,
    },
    GuillotineStrip {
        #[serde(default)]
        direction: StripDirection,
    },
    Column {
        #[serde(default)]
        variant: ColumnVariant,
    },
}

impl Strategy {
    pub fn packer(&self, strip_tolerance: f64) -> Box<dyn SheetPacker> {
        match *self {
            Strategy::BottomLeft => Box::new(BottomLeftPacker),
            Strategy::BestAreaFit { heuristic } => Box::new(BestAreaFitPacker::new(heuristic)),
            Strategy::GuillotineStrip { direction } => {
                Box::new(StripPacker::new(direction).with_tolerance(strip_tolerance))
            }
            Strategy::Column { variant } => Box::new(ColumnPacker::new(variant)),
        }
    }

    /// Whether layouts from this strategy can be cut with full-span saw cuts.
    pub fn is_guillotine(&self) -> bool {
        matches!(
            self,
            Strategy::GuillotineStrip { .. } | Strategy::Column { .. }
        )
    }

    /// Axis of the first cut pass for guillotine layouts.
    pub fn first_cut_axis(&self) -> CutAxis {
        match self {
            Strategy::GuillotineStrip {
                direction: StripDirection::Vertical,
            }
            | Strategy::Column { .. } => CutAxis::X,
            _ => CutAxis::Y,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::BottomLeft => "bottom-left",
            Strategy::BestAreaFit {
                heuristic: FitHeuristic::BestAreaFit,
            } => "best-area-fit",
            Strategy::BestAreaFit {
                heuristic: FitHeuristic::BestShortSideFit,
            } => "best-short-side-fit",
            Strategy::BestAreaFit {
                heuristic: FitHeuristic::BestLongSideFit,
            } => "best-long-side-fit",
            Strategy::GuillotineStrip {
                direction: StripDirection::Horizontal,
            } => "strip-horizontal",
            Strategy::GuillotineStrip {
                direction: StripDirection::Vertical,
            } => "strip-vertical",
            Strategy::GuillotineStrip {
                direction: StripDirection::Auto,
            } => "strip-auto",
            Strategy::Column {
                variant: ColumnVariant::Rip,
            } => "column",
            Strategy::Column {
                variant: ColumnVariant::Cutsaw,
            } => "cutsaw",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let strategy = match s.trim().to_ascii_lowercase().as_str() {
            "bottom-left" | "bl" => Strategy::BottomLeft,
            "best-area-fit" | "baf" | "maxrects" => Strategy::BestAreaFit {
                heuristic: FitHeuristic::BestAreaFit,
            },
            "best-short-side-fit" | "bssf" => Strategy::BestAreaFit {
                heuristic: FitHeuristic::BestShortSideFit,
            },
            "best-long-side-fit" | "blsf" => Strategy::BestAreaFit {
                heuristic: FitHeuristic::BestLongSideFit,
            },
            "strip-horizontal" | "horizontal" => Strategy::GuillotineStrip {
                direction: StripDirection::Horizontal,
            },
            "strip-vertical" | "vertical" => Strategy::GuillotineStrip {
                direction: StripDirection::Vertical,
            },
            "strip-auto" | "strip" | "guillotine" => Strategy::GuillotineStrip {
                direction: StripDirection::Auto,
            },
            "column" | "rip" => Strategy::Column {
                variant: ColumnVariant::Rip,
            },
            "cutsaw" => Strategy::Column {
                variant: ColumnVariant::Cutsaw,
            },
            other => return Err(format!("unknown strategy '{other}'")),
        };
        Ok(strategy)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_touching_is_disjoint() {
        let a = Region::new(0, 0, Rect::new(100, 100));
        let b = Region::new(100, 0, Rect::new(50, 50));
        assert!(!a.intersects(&b));
        let c = Region::new(99, 99, Rect::new(10, 10));
        assert!(a.intersects(&c));
        assert!(a.contains(&Region::new(10, 10, Rect::new(90, 90))));
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for name in [
            "bottom-left",
            "best-area-fit",
            "best-short-side-fit",
            "best-long-side-fit",
            "strip-horizontal",
            "strip-vertical",
            "strip-auto",
            "column",
            "cutsaw",
        ] {
            let strategy: Strategy = name.parse().unwrap();
            assert_eq!(strategy.to_string(), name);
        }
        assert!("simulated-annealing".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_strategy_json_defaults() {
        let s: Strategy = serde_json::from_str(r#"{"kind":"guillotine-strip"}"#).unwrap();
        assert_eq!(
            s,
            Strategy::GuillotineStrip {
                direction: StripDirection::Auto
            }
        );
        assert!(s.is_guillotine());
        assert_eq!(
            Strategy::Column {
                variant: ColumnVariant::Rip
            }
            .first_cut_axis(),
            CutAxis::X
        );
    }

    #[test]
    fn test_outcome_keeps_input_order() {
        let insts = test_support::instances(&[("a", 10, 10, 3)], false);
        let placed = vec![PlacedPanel::new(&insts[1], 0, 0, false)];
        let outcome = PackOutcome::new(placed, &insts);
        let ids: Vec<&str> = outcome.remaining.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a-0", "a-2"]);
        assert_eq!(outcome.used_area(), 100);
    }
}
