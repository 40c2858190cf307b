//! Cut sequences and saw statistics derived from finished sheets.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{PlacedPanel, SheetResult};

/// `X` cuts are vertical lines at a given x, `Y` cuts horizontal lines at a given y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutAxis {
    X,
    Y,
}

impl CutAxis {
    pub fn other(self) -> Self {
        match self {
            CutAxis::X => CutAxis::Y,
            CutAxis::Y => CutAxis::X,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CutStyle {
    /// Nested strip cuts, the first level spanning the whole sheet.
    Guillotine { first_axis: CutAxis },
    /// Short cuts around each panel.
    Nesting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutStep {
    pub sheet_id: String,
    pub seq: u32,
    pub axis: CutAxis,
    pub position: u32,
    pub span_start: u32,
    pub span_end: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yields_panel: Option<String>,
}

impl CutStep {
    pub fn length(&self) -> u32 {
        self.span_end - self.span_start
    }
}

/// A rectangle still to be cut, with the panels lying inside it.
#[derive(Debug)]
struct Piece<'a> {
    x: (u32, u32),
    y: (u32, u32),
    axis: CutAxis,
    panels: Vec<&'a PlacedPanel>,
}

impl Piece<'_> {
    fn range(&self, axis: CutAxis) -> (u32, u32) {
        match axis {
            CutAxis::X => self.x,
            CutAxis::Y => self.y,
        }
    }
}

fn extent(panel: &PlacedPanel, axis: CutAxis) -> (u32, u32) {
    match axis {
        CutAxis::X => (panel.x, panel.right()),
        CutAxis::Y => (panel.y, panel.bottom()),
    }
}

/// Panel edges more than a kerf inside `range` that no panel straddles.
fn free_lines(panels: &[&PlacedPanel], axis: CutAxis, range: (u32, u32), kerf: u32) -> Vec<u32> {
    let mut lines: Vec<u32> = panels
        .iter()
        .flat_map(|p| {
            let (start, end) = extent(p, axis);
            [start, end]
        })
        .filter(|&pos| pos > range.0 + kerf && pos < range.1.saturating_sub(kerf))
        .filter(|&pos| {
            panels.iter().all(|p| {
                let (start, end) = extent(p, axis);
                pos <= start || pos >= end
            })
        })
        .collect();
    lines.sort_unstable();
    lines.dedup();
    lines
}

/// Nested guillotine cuts, breadth first.
///
/// The first level runs across the whole sheet along `first_axis`; every
/// later cut spans only the strip it splits, alternating axes. A piece with
/// no clear line on either axis is a single panel or offcut and stops there.
pub fn guillotine_cuts(sheet: &SheetResult, kerf: u32, first_axis: CutAxis) -> Vec<CutStep> {
    let mut steps: Vec<CutStep> = Vec::new();
    let mut queue = VecDeque::from([Piece {
        x: (0, sheet.width),
        y: (0, sheet.height),
        axis: first_axis,
        panels: sheet.panels.iter().collect(),
    }]);

    while let Some(piece) = queue.pop_front() {
        if piece.panels.is_empty() {
            continue;
        }
        let chosen = [piece.axis, piece.axis.other()]
            .into_iter()
            .find_map(|axis| {
                let lines = free_lines(&piece.panels, axis, piece.range(axis), kerf);
                (!lines.is_empty()).then_some((axis, lines))
            });
        let Some((axis, lines)) = chosen else {
            continue;
        };

        let (lo, hi) = piece.range(axis);
        let (span_start, span_end) = piece.range(axis.other());
        for &position in &lines {
            steps.push(CutStep {
                sheet_id: sheet.id.clone(),
                seq: steps.len() as u32 + 1,
                axis,
                position,
                span_start,
                span_end,
                yields_panel: None,
            });
        }

        let bounds: Vec<u32> = std::iter::once(lo)
            .chain(lines.iter().copied())
            .chain(std::iter::once(hi))
            .collect();
        for window in bounds.windows(2) {
            let slice = (window[0], window[1]);
            let panels = piece
                .panels
                .iter()
                .copied()
                .filter(|p| {
                    let start = extent(p, axis).0;
                    start >= slice.0 && start < slice.1
                })
                .collect();
            let (x, y) = match axis {
                CutAxis::X => (slice, piece.y),
                CutAxis::Y => (piece.x, slice),
            };
            queue.push_back(Piece {
                x,
                y,
                axis: axis.other(),
                panels,
            });
        }
    }

    steps
}

pub fn nesting_cuts(sheet: &SheetResult, kerf: u32) -> Vec<CutStep> {
    let mut steps = Vec::new();
    let mut seq = 0u32;

    for panel in &sheet.panels {
        let (left, top, right, bottom) = (panel.x, panel.y, panel.right(), panel.bottom());
        let edges = [
            (CutAxis::Y, top, top > kerf, left, right),
            (CutAxis::Y, bottom, bottom < sheet.height.saturating_sub(kerf), left, right),
            (CutAxis::X, left, left > kerf, top, bottom),
            (CutAxis::X, right, right < sheet.width.saturating_sub(kerf), top, bottom),
        ];

        let first = steps.len();
        for (axis, position, needed, span_start, span_end) in edges {
            if !needed {
                continue;
            }
            seq += 1;
            steps.push(CutStep {
                sheet_id: sheet.id.clone(),
                seq,
                axis,
                position,
                span_start,
                span_end,
                yields_panel: None,
            });
        }
        if let Some(last) = steps[first..].last_mut() {
            last.yields_panel = Some(panel.instance_id.clone());
        }
    }

    steps
}

pub fn cuts_for_sheet(sheet: &SheetResult, kerf: u32, style: CutStyle) -> Vec<CutStep> {
    match style {
        CutStyle::Guillotine { first_axis } => guillotine_cuts(sheet, kerf, first_axis),
        CutStyle::Nesting => nesting_cuts(sheet, kerf),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SheetSawStats {
    /// Length of `Y` cuts.
    pub horizontal: u64,
    /// Length of `X` cuts.
    pub vertical: u64,
    pub total: u64,
    pub cut_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SawStats {
    pub sheets: BTreeMap<String, SheetSawStats>,
    pub total: u64,
    pub total_cuts: usize,
}

/// Length of the union of the spans; sorts in place.
fn union_length(spans: &mut [(u32, u32)]) -> u64 {
    spans.sort_unstable();
    let mut total = 0u64;
    let mut current: Option<(u32, u32)> = None;
    for &(start, end) in spans.iter() {
        current = match current {
            Some((s, e)) if start <= e => Some((s, e.max(end))),
            Some((s, e)) => {
                total += (e - s) as u64;
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    if let Some((s, e)) = current {
        total += (e - s) as u64;
    }
    total
}

/// Sums saw travel, counting overlapping cuts on the same line once.
pub fn saw_stats(cuts: &[CutStep]) -> SawStats {
    let mut lines: BTreeMap<(&str, CutAxis, u32), Vec<(u32, u32)>> = BTreeMap::new();
    for cut in cuts {
        lines
            .entry((cut.sheet_id.as_str(), cut.axis, cut.position))
            .or_default()
            .push((cut.span_start, cut.span_end));
    }

    let mut stats = SawStats::default();
    for ((sheet_id, axis, _), mut spans) in lines {
        let length = union_length(&mut spans);
        let entry = stats.sheets.entry(sheet_id.to_string()).or_default();
        match axis {
            CutAxis::X => entry.vertical += length,
            CutAxis::Y => entry.horizontal += length,
        }
        entry.total += length;
        stats.total += length;
    }
    for cut in cuts {
        if let Some(entry) = stats.sheets.get_mut(&cut.sheet_id) {
            entry.cut_count += 1;
        }
    }
    stats.total_cuts = cuts.len();
    stats
}
