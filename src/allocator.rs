//! Multi-sheet allocation.
//!
//! Opens sheets one at a time and runs a single-sheet packer over everything
//! still pending, until nothing is left or a limit stops the loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::packer::{BottomLeftPacker, SheetPacker};
use crate::types::{PanelInstance, PlacedPanel, Rect, efficiency};

pub const DEFAULT_MAX_SHEETS: usize = 999;

/// Shared flag checked between sheets.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct AllocationLimits {
    pub max_sheets: usize,
    pub max_iterations: Option<usize>,
    pub time_budget: Option<Duration>,
}

impl Default for AllocationLimits {
    fn default() -> Self {
        Self {
            max_sheets: DEFAULT_MAX_SHEETS,
            max_iterations: None,
            time_budget: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Complete,
    Stalled,
    CeilingReached,
    BudgetExhausted,
    Cancelled,
}

/// One filled sheet, before the orchestrator names it.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedSheet {
    pub size: Rect,
    pub panels: Vec<PlacedPanel>,
}

impl PackedSheet {
    pub fn used_area(&self) -> u64 {
        self.panels.iter().map(PlacedPanel::area).sum()
    }

    pub fn efficiency(&self) -> f64 {
        efficiency(self.used_area(), self.size)
    }
}

#[derive(Debug, Clone)]
pub struct Allocation {
    pub sheets: Vec<PackedSheet>,
    /// Fits the sheet but was left when the loop stopped.
    pub unplaced: Vec<PanelInstance>,
    /// Fits the sheet in no permitted orientation.
    pub oversized: Vec<PanelInstance>,
    pub stop: StopReason,
}

pub fn allocate(
    sheet: Rect,
    kerf: u32,
    instances: Vec<PanelInstance>,
    packer: &dyn SheetPacker,
    limits: &AllocationLimits,
    cancel: Option<&CancellationToken>,
) -> Allocation {
    let started = Instant::now();
    let (mut pending, oversized): (Vec<_>, Vec<_>) =
        instances.into_iter().partition(|i| i.fits(sheet));
    let mut sheets: Vec<PackedSheet> = Vec::new();
    let mut iterations = 0usize;

    let stop = loop {
        if pending.is_empty() {
            break StopReason::Complete;
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            break StopReason::Cancelled;
        }
        if sheets.len() >= limits.max_sheets {
            warn!(max_sheets = limits.max_sheets, left = pending.len(), "sheet limit reached");
            break StopReason::CeilingReached;
        }
        let out_of_iterations = limits.max_iterations.is_some_and(|max| iterations >= max);
        let out_of_time = limits.time_budget.is_some_and(|b| started.elapsed() >= b);
        if out_of_iterations || out_of_time {
            warn!(iterations, left = pending.len(), "allocation budget exhausted");
            break StopReason::BudgetExhausted;
        }
        iterations += 1;

        let outcome = packer.pack(sheet, kerf, &pending);
        if outcome.placed.is_empty() {
            warn!(left = pending.len(), "no panel fits an empty sheet, stopping");
            break StopReason::Stalled;
        }
        let packed = PackedSheet {
            size: sheet,
            panels: outcome.placed,
        };
        debug!(
            sheet = sheets.len() + 1,
            placed = packed.panels.len(),
            efficiency = packed.efficiency(),
            "sheet packed"
        );
        sheets.push(packed);
        pending = outcome.remaining;
    };

    Allocation {
        sheets,
        unplaced: pending,
        oversized,
        stop,
    }
}

/// Thresholds for the post-pass that merges poorly used sheets.
///
/// These are shop-floor heuristics; calibrate per machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedistributionPolicy {
    pub low_efficiency: f64,
    pub few_panels: usize,
    pub very_low_efficiency: f64,
    pub min_efficiency_gain: f64,
    pub large_area: u64,
    pub large_side: u32,
    pub medium_area: u64,
    pub medium_side: u32,
}

impl Default for RedistributionPolicy {
    fn default() -> Self {
        Self {
            low_efficiency: 0.20,
            few_panels: 2,
            very_low_efficiency: 0.15,
            min_efficiency_gain: 0.05,
            large_area: 500_000,
            large_side: 1000,
            medium_area: 200_000,
            medium_side: 600,
        }
    }
}

impl RedistributionPolicy {
    pub fn triggers(&self, sheets: &[PackedSheet]) -> bool {
        sheets.iter().any(|s| {
            let eff = s.efficiency();
            (eff < self.low_efficiency && s.panels.len() <= self.few_panels)
                || eff < self.very_low_efficiency
        })
    }

    /// 0 = large, 1 = medium, 2 = small.
    fn tier(&self, size: Rect) -> u8 {
        if size.area() > self.large_area || size.longest_side() > self.large_side {
            0
        } else if size.area() > self.medium_area || size.longest_side() > self.medium_side {
            1
        } else {
            2
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Redistribution {
    Kept,
    Improved(Vec<PackedSheet>),
}

fn mean_efficiency(sheets: &[PackedSheet]) -> f64 {
    if sheets.is_empty() {
        return 0.0;
    }
    sheets.iter().map(PackedSheet::efficiency).sum::<f64>() / sheets.len() as f64
}

/// Re-packs every placed panel with bottom-left in size-tier order.
///
/// `instances` must contain the instances behind the placed panels; their
/// rotation permission is looked up by id.
pub fn redistribute(
    sheets: &[PackedSheet],
    instances: &[PanelInstance],
    kerf: u32,
    policy: &RedistributionPolicy,
) -> Redistribution {
    let Some(first) = sheets.first() else {
        return Redistribution::Kept;
    };
    if !policy.triggers(sheets) {
        return Redistribution::Kept;
    }
    let size = first.size;

    let by_id: HashMap<&str, &PanelInstance> =
        instances.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut pool: Vec<&PanelInstance> = Vec::new();
    for panel in sheets.iter().flat_map(|s| &s.panels) {
        match by_id.get(panel.instance_id.as_str()) {
            Some(instance) => pool.push(instance),
            None => {
                warn!(instance = %panel.instance_id, "placed panel has no instance, skipping redistribution");
                return Redistribution::Kept;
            }
        }
    }
    pool.sort_by(|a, b| {
        policy
            .tier(a.size)
            .cmp(&policy.tier(b.size))
            .then(b.area().cmp(&a.area()))
    });

    let mut candidate: Vec<PackedSheet> = Vec::new();
    while !pool.is_empty() && candidate.len() < sheets.len() {
        let placed = BottomLeftPacker.pack_in_order(size, kerf, pool.iter().copied());
        if placed.is_empty() {
            break;
        }
        pool.retain(|i| !placed.iter().any(|p| p.instance_id == i.id));
        candidate.push(PackedSheet { size, panels: placed });
    }

    if !pool.is_empty() {
        debug!(left = pool.len(), "redistribution could not place every panel");
        return Redistribution::Kept;
    }

    let fewer = candidate.len() < sheets.len();
    let gain = mean_efficiency(&candidate) - mean_efficiency(sheets);
    if fewer || gain >= policy.min_efficiency_gain {
        debug!(before = sheets.len(), after = candidate.len(), gain, "redistribution accepted");
        Redistribution::Improved(candidate)
    } else {
        Redistribution::Kept
    }
}
