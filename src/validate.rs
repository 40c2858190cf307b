use serde::Serialize;

use crate::packer::Region;
use crate::types::{PlacedPanel, Rect, SheetResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    OutOfBounds { instance_id: String },
    Overlap { first: String, second: String },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::OutOfBounds { instance_id } => {
                write!(f, "{instance_id} extends past the sheet")
            }
            Violation::Overlap { first, second } => {
                write!(f, "{first} and {second} overlap or are closer than the kerf")
            }
        }
    }
}

/// Checks bounds and kerf clearance between every pair of panels.
pub fn validate_placements(sheet: Rect, kerf: u32, panels: &[PlacedPanel]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for p in panels {
        if p.right() > sheet.w || p.bottom() > sheet.h {
            violations.push(Violation::OutOfBounds {
                instance_id: p.instance_id.clone(),
            });
        }
    }

    let claimed: Vec<Region> = panels
        .iter()
        .map(|p| Region::new(p.x, p.y, p.footprint().grown(kerf)))
        .collect();
    for i in 0..claimed.len() {
        for j in (i + 1)..claimed.len() {
            if claimed[i].intersects(&claimed[j]) {
                violations.push(Violation::Overlap {
                    first: panels[i].instance_id.clone(),
                    second: panels[j].instance_id.clone(),
                });
            }
        }
    }

    violations
}

pub fn validate_sheet(sheet: &SheetResult, kerf: u32) -> Vec<Violation> {
    validate_placements(sheet.size(), kerf, &sheet.panels)
}
