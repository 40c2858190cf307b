//! Guillotine strip packing.
//!
//! Horizontal strips run across the full sheet width and are stacked top to
//! bottom; panels inside a strip sit side by side. Vertical strips are the
//! same layout with the axes swapped, so they are computed by transposing the
//! sheet and the instances and transposing the result back.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{EXACT_MATCH_TOLERANCE, PackOutcome, STRIP_MATCH_TOLERANCE, SheetPacker};
use crate::types::{PanelInstance, PlacedPanel, Rect, efficiency};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StripDirection {
    Horizontal,
    Vertical,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy)]
pub struct StripPacker {
    direction: StripDirection,
    tolerance: f64,
}

impl Default for StripPacker {
    fn default() -> Self {
        Self::new(StripDirection::Auto)
    }
}

impl StripPacker {
    pub fn new(direction: StripDirection) -> Self {
        Self {
            direction,
            tolerance: STRIP_MATCH_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.clamp(0.0, 1.0);
        self
    }

    fn mixed(&self, sheet: Rect, kerf: u32, instances: &[PanelInstance]) -> Vec<PlacedPanel> {
        if instances.is_empty() {
            return Vec::new();
        }
        let mean = instances.iter().map(|i| i.area() as f64).sum::<f64>() / instances.len() as f64;
        let (large, small): (Vec<PanelInstance>, Vec<PanelInstance>) = instances
            .iter()
            .cloned()
            .partition(|i| i.area() as f64 > mean * 1.5);

        let mut placed = pack_oriented(sheet, kerf, &large, self.tolerance, Orientation::Rows);
        let used_height = placed
            .iter()
            .map(PlacedPanel::bottom)
            .max()
            .map_or(0, |bottom| bottom + kerf);
        if used_height >= sheet.h {
            return placed;
        }

        // Large panels that missed the rows get another chance below them
        let leftover = PackOutcome::new(placed.clone(), &large).remaining;
        let rest: Vec<PanelInstance> = leftover.into_iter().chain(small).collect();
        let below = Rect::new(sheet.w, sheet.h - used_height);
        placed.extend(
            pack_oriented(below, kerf, &rest, self.tolerance, Orientation::Columns)
                .into_iter()
                .map(|mut p| {
                    p.y += used_height;
                    p
                }),
        );
        placed
    }
}

impl SheetPacker for StripPacker {
    fn pack(&self, sheet: Rect, kerf: u32, instances: &[PanelInstance]) -> PackOutcome {
        let placed = match self.direction {
            StripDirection::Horizontal => {
                pack_oriented(sheet, kerf, instances, self.tolerance, Orientation::Rows)
            }
            StripDirection::Vertical => {
                pack_oriented(sheet, kerf, instances, self.tolerance, Orientation::Columns)
            }
            StripDirection::Auto => {
                let candidates = [
                    ("horizontal", pack_oriented(sheet, kerf, instances, self.tolerance, Orientation::Rows)),
                    ("vertical", pack_oriented(sheet, kerf, instances, self.tolerance, Orientation::Columns)),
                    ("mixed", self.mixed(sheet, kerf, instances)),
                ];
                let mut best: Option<(&str, f64, Vec<PlacedPanel>)> = None;
                for (name, placed) in candidates {
                    let used = placed.iter().map(PlacedPanel::area).sum();
                    let eff = efficiency(used, sheet);
                    trace!(layout = name, efficiency = eff, placed = placed.len(), "strip candidate");
                    if best.as_ref().is_none_or(|(_, best_eff, _)| eff > *best_eff) {
                        best = Some((name, eff, placed));
                    }
                }
                best.map(|(_, _, placed)| placed).unwrap_or_default()
            }
        };
        PackOutcome::new(placed, instances)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Rows,
    Columns,
}

fn transpose_instance(instance: &PanelInstance) -> PanelInstance {
    PanelInstance {
        size: instance.size.rotated(),
        ..instance.clone()
    }
}

fn transpose_placed(p: PlacedPanel) -> PlacedPanel {
    PlacedPanel {
        x: p.y,
        y: p.x,
        width: p.height,
        height: p.width,
        ..p
    }
}

fn pack_oriented(
    sheet: Rect,
    kerf: u32,
    instances: &[PanelInstance],
    tolerance: f64,
    orientation: Orientation,
) -> Vec<PlacedPanel> {
    match orientation {
        Orientation::Rows => pack_rows(sheet, kerf, instances, tolerance),
        Orientation::Columns => {
            let transposed: Vec<PanelInstance> = instances.iter().map(transpose_instance).collect();
            pack_rows(sheet.rotated(), kerf, &transposed, tolerance)
                .into_iter()
                .map(transpose_placed)
                .collect()
        }
    }
}

/// Groups identical sizes, tallest group first, then the larger group.
fn strip_order(instances: &[PanelInstance]) -> Vec<&PanelInstance> {
    let mut by_area: Vec<&PanelInstance> = instances.iter().collect();
    by_area.sort_by(|a, b| b.area().cmp(&a.area()));

    let mut groups: Vec<(Rect, Vec<&PanelInstance>)> = Vec::new();
    for instance in by_area {
        match groups.iter_mut().find(|(size, _)| *size == instance.size) {
            Some((_, members)) => members.push(instance),
            None => groups.push((instance.size, vec![instance])),
        }
    }
    groups.sort_by(|(a, ma), (b, mb)| b.h.cmp(&a.h).then(mb.len().cmp(&ma.len())));
    groups.into_iter().flat_map(|(_, members)| members).collect()
}

/// A panel this strip would take: index into the candidate list, x, rotation.
type Slot = (usize, u32, bool);

/// Simulates filling one row of the given height, in three passes.
///
/// Returns the slots and the consumed length including trailing kerfs.
fn fill_row(
    row_height: u32,
    sheet_width: u32,
    kerf: u32,
    candidates: &[&PanelInstance],
    tolerance: f64,
) -> (Vec<Slot>, u32) {
    let exact = EXACT_MATCH_TOLERANCE.min(tolerance);
    let within = |h: u32, limit: f64| {
        h <= row_height && (row_height - h) as f64 <= row_height as f64 * limit
    };

    let mut taken = vec![false; candidates.len()];
    let mut slots = Vec::new();
    let mut cursor = 0u32;

    let passes: [(f64, bool); 3] = [(exact, false), (tolerance, false), (tolerance, true)];
    for (limit, rotated) in passes {
        for (idx, instance) in candidates.iter().enumerate() {
            if taken[idx] || (rotated && !instance.can_rotate) {
                continue;
            }
            let footprint = if rotated {
                instance.size.rotated()
            } else {
                instance.size
            };
            if !within(footprint.h, limit) || cursor + footprint.w > sheet_width {
                continue;
            }
            taken[idx] = true;
            slots.push((idx, cursor, rotated));
            cursor += footprint.w + kerf;
        }
    }

    (slots, cursor)
}

fn pack_rows(
    sheet: Rect,
    kerf: u32,
    instances: &[PanelInstance],
    tolerance: f64,
) -> Vec<PlacedPanel> {
    let mut pending = strip_order(instances);
    let mut placed = Vec::new();
    let mut y = 0u32;

    while !pending.is_empty() && y < sheet.h {
        let available = sheet.h - y;
        let mut heights: Vec<u32> = pending
            .iter()
            .flat_map(|i| {
                let rotated = i.can_rotate.then_some(i.size.w);
                std::iter::once(i.size.h).chain(rotated)
            })
            .filter(|&h| h > 0 && h <= available)
            .collect();
        heights.sort_unstable_by(|a, b| b.cmp(a));
        heights.dedup();

        let mut best: Option<(u32, Vec<Slot>, f64)> = None;
        for height in heights {
            let (slots, consumed) = fill_row(height, sheet.w, kerf, &pending, tolerance);
            if slots.is_empty() {
                continue;
            }
            let utilization = consumed.min(sheet.w) as f64 / sheet.w as f64 * slots.len() as f64;
            if best.as_ref().is_none_or(|(_, _, u)| utilization > *u) {
                best = Some((height, slots, utilization));
            }
        }

        let Some((height, slots, _)) = best else {
            break;
        };

        let mut taken = vec![false; pending.len()];
        for (idx, x, rotated) in slots {
            taken[idx] = true;
            placed.push(PlacedPanel::new(pending[idx], x, y, rotated));
        }
        let mut flags = taken.into_iter();
        pending.retain(|_| !flags.next().unwrap_or(false));

        y += height + kerf;
    }

    placed
}
