//! Orchestration: validation, grouping, stock resolution, allocation and
//! cut-style selection for a whole job.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::allocator::{
    AllocationLimits, CancellationToken, DEFAULT_MAX_SHEETS, Redistribution, RedistributionPolicy,
    StopReason, allocate, redistribute,
};
use crate::cuts::{CutStep, CutStyle, SawStats, cuts_for_sheet, saw_stats};
use crate::error::{Error, Issue, Result};
use crate::packer::{FitHeuristic, STRIP_MATCH_TOLERANCE, Strategy, StripDirection};
use crate::types::{PanelInstance, PanelRequest, SheetResult, StockSheetSpec, TrimMargins};
use crate::validate::validate_sheet;

pub const DEFAULT_KERF: u32 = 5;

/// Which family of strategies a job may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationMode {
    /// Free placement, cut panel by panel.
    #[default]
    Nesting,
    /// Guillotine-cuttable layouts for panel saws.
    RipFirst,
}

impl OptimizationMode {
    pub fn default_strategy(self) -> Strategy {
        match self {
            OptimizationMode::Nesting => Strategy::BestAreaFit {
                heuristic: FitHeuristic::BestAreaFit,
            },
            OptimizationMode::RipFirst => Strategy::GuillotineStrip {
                direction: StripDirection::Auto,
            },
        }
    }
}

impl fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationMode::Nesting => f.write_str("nesting"),
            OptimizationMode::RipFirst => f.write_str("rip-first"),
        }
    }
}

impl std::str::FromStr for OptimizationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nesting" | "cnc" => Ok(OptimizationMode::Nesting),
            "rip-first" | "rip" | "panel-saw" => Ok(OptimizationMode::RipFirst),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// What to do with a group no stock sheet matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StockFallback {
    #[default]
    FirstAvailable,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub kerf: u32,
    pub trim: TrimMargins,
    pub mode: OptimizationMode,
    pub strategy: Option<Strategy>,
    pub consider_material: bool,
    /// ANDed with each request's own permission.
    pub allow_rotation: bool,
    pub stock_fallback: StockFallback,
    pub max_sheets_per_group: usize,
    /// Bottom-left re-pack of sparse sheets; nesting mode only, since it
    /// does not preserve strip or column structure.
    pub redistribute: bool,
    pub redistribution: RedistributionPolicy,
    pub strip_tolerance: f64,
    pub parallel: bool,
    pub time_budget_ms: Option<u64>,
    pub max_iterations: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kerf: DEFAULT_KERF,
            trim: TrimMargins::default(),
            mode: OptimizationMode::default(),
            strategy: None,
            consider_material: true,
            allow_rotation: true,
            stock_fallback: StockFallback::default(),
            max_sheets_per_group: DEFAULT_MAX_SHEETS,
            redistribute: true,
            redistribution: RedistributionPolicy::default(),
            strip_tolerance: STRIP_MATCH_TOLERANCE,
            parallel: true,
            time_budget_ms: None,
            max_iterations: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.strip_tolerance) {
            return Err(Error::InvalidSettings(format!(
                "strip_tolerance must be within 0..=1, got {}",
                self.strip_tolerance
            )));
        }
        if self.max_sheets_per_group == 0 {
            return Err(Error::InvalidSettings(
                "max_sheets_per_group must be at least 1".into(),
            ));
        }
        self.resolve_strategy().map(|_| ())
    }

    /// The explicit strategy, or the mode's default.
    pub fn resolve_strategy(&self) -> Result<Strategy> {
        let Some(strategy) = self.strategy else {
            return Ok(self.mode.default_strategy());
        };
        let allowed = match self.mode {
            OptimizationMode::Nesting => !strategy.is_guillotine(),
            OptimizationMode::RipFirst => strategy.is_guillotine(),
        };
        if !allowed {
            return Err(Error::StrategyModeMismatch {
                strategy: strategy.to_string(),
                mode: self.mode.to_string(),
            });
        }
        Ok(strategy)
    }

    pub fn cut_style(&self) -> Result<CutStyle> {
        let strategy = self.resolve_strategy()?;
        Ok(match self.mode {
            OptimizationMode::Nesting => CutStyle::Nesting,
            OptimizationMode::RipFirst => CutStyle::Guillotine {
                first_axis: strategy.first_cut_axis(),
            },
        })
    }

    fn limits(&self, available: Option<u32>) -> AllocationLimits {
        let max_sheets = available.map_or(self.max_sheets_per_group, |n| {
            (n as usize).min(self.max_sheets_per_group)
        });
        AllocationLimits {
            max_sheets,
            max_iterations: self.max_iterations,
            time_budget: self.time_budget_ms.map(Duration::from_millis),
        }
    }
}

/// Material and thickness bucket; thickness is kept in tenths of a millimetre.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub material: Option<String>,
    pub thickness_tenths: u32,
}

fn thickness_tenths(thickness: f64) -> u32 {
    (thickness * 10.0).round() as u32
}

impl GroupKey {
    pub fn for_request(request: &PanelRequest, consider_material: bool) -> Self {
        Self {
            material: if consider_material {
                request.material.clone()
            } else {
                None
            },
            thickness_tenths: thickness_tenths(request.thickness),
        }
    }

    /// `"PB-18"`, `"MDF-12.5"`, or just `"18"` without a material.
    pub fn label(&self) -> String {
        let thickness = if self.thickness_tenths % 10 == 0 {
            format!("{}", self.thickness_tenths / 10)
        } else {
            format!("{}.{}", self.thickness_tenths / 10, self.thickness_tenths % 10)
        };
        match &self.material {
            Some(material) => format!("{material}-{thickness}"),
            None => thickness,
        }
    }

    fn matches_thickness(&self, stock: &StockSheetSpec) -> bool {
        thickness_tenths(stock.thickness) == self.thickness_tenths
    }

    fn matches_material(&self, stock: &StockSheetSpec) -> bool {
        self.material.is_some() && self.material == stock.material
    }
}

enum StockMatch<'a> {
    Matched(&'a StockSheetSpec),
    Fallback(&'a StockSheetSpec),
    Missing,
}

fn resolve_stock<'a>(
    key: &GroupKey,
    stock: &'a [StockSheetSpec],
    fallback: StockFallback,
) -> StockMatch<'a> {
    if let Some(spec) = stock
        .iter()
        .find(|s| key.matches_material(s) && key.matches_thickness(s))
    {
        return StockMatch::Matched(spec);
    }
    if let Some(spec) = stock.iter().find(|s| key.matches_thickness(s)) {
        return StockMatch::Matched(spec);
    }
    match (fallback, stock.first()) {
        (StockFallback::FirstAvailable, Some(spec)) => StockMatch::Fallback(spec),
        _ => StockMatch::Missing,
    }
}

/// Result of a whole job.
#[derive(Debug, Clone, Serialize)]
pub struct Layout {
    pub sheets: Vec<SheetResult>,
    pub unplaced: Vec<PanelInstance>,
    pub issues: Vec<Issue>,
    pub kerf: u32,
    pub cut_style: CutStyle,
}

impl Layout {
    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn placed_count(&self) -> usize {
        self.sheets.iter().map(|s| s.panels.len()).sum()
    }

    /// Used area over usable area across all sheets.
    pub fn total_efficiency(&self) -> f64 {
        let usable: u64 = self.sheets.iter().map(|s| s.size().area()).sum();
        if usable == 0 {
            return 0.0;
        }
        let used: u64 = self.sheets.iter().map(|s| s.used_area).sum();
        used as f64 / usable as f64
    }

    pub fn total_waste_percent(&self) -> f64 {
        if self.sheets.is_empty() {
            return 0.0;
        }
        (1.0 - self.total_efficiency()) * 100.0
    }

    pub fn sheet_cuts(&self, sheet: &SheetResult) -> Vec<CutStep> {
        cuts_for_sheet(sheet, self.kerf, self.cut_style)
    }

    pub fn cut_plan(&self) -> Vec<CutStep> {
        self.sheets.iter().flat_map(|s| self.sheet_cuts(s)).collect()
    }

    pub fn saw_stats(&self) -> SawStats {
        saw_stats(&self.cut_plan())
    }
}

/// A serialised optimisation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub panels: Vec<PanelRequest>,
    pub stock: Vec<StockSheetSpec>,
    #[serde(default)]
    pub settings: Settings,
}

impl Job {
    pub fn run(&self, cancel: Option<&CancellationToken>) -> Result<Layout> {
        optimize(&self.panels, &self.stock, &self.settings, cancel)
    }
}

fn validate_requests(requests: &[PanelRequest]) -> Result<()> {
    let mut seen = HashSet::new();
    for r in requests {
        let invalid = |reason: &str| Error::InvalidPanel {
            id: r.id.clone(),
            reason: reason.to_string(),
        };
        if r.id.trim().is_empty() {
            return Err(invalid("id is empty"));
        }
        if r.width == 0 || r.height == 0 {
            return Err(invalid("width and height must be positive"));
        }
        if r.quantity == 0 {
            return Err(invalid("quantity must be at least 1"));
        }
        if !r.thickness.is_finite() || r.thickness < 0.0 {
            return Err(invalid("thickness must be a non-negative number"));
        }
        if !seen.insert(r.id.as_str()) {
            return Err(Error::DuplicatePanelId(r.id.clone()));
        }
    }
    Ok(())
}

fn validate_stock(stock: &[StockSheetSpec], trim: &TrimMargins) -> Result<()> {
    for s in stock {
        let invalid = |reason: &str| Error::InvalidStock {
            id: s.id.clone(),
            reason: reason.to_string(),
        };
        if s.width == 0 || s.height == 0 {
            return Err(invalid("width and height must be positive"));
        }
        if !s.thickness.is_finite() || s.thickness < 0.0 {
            return Err(invalid("thickness must be a non-negative number"));
        }
        if trim.usable(s.size()).is_none() {
            return Err(invalid("trim margins consume the whole sheet"));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct GroupOutcome {
    sheets: Vec<SheetResult>,
    unplaced: Vec<PanelInstance>,
    issues: Vec<Issue>,
}

fn ids(instances: &[PanelInstance]) -> Vec<String> {
    instances.iter().map(|i| i.id.clone()).collect()
}

fn run_group(
    key: &GroupKey,
    requests: &[&PanelRequest],
    stock: &[StockSheetSpec],
    settings: &Settings,
    strategy: Strategy,
    cancel: Option<&CancellationToken>,
) -> GroupOutcome {
    let group = key.label();
    let instances: Vec<PanelInstance> = requests
        .iter()
        .flat_map(|r| r.expand(settings.allow_rotation))
        .collect();
    let mut outcome = GroupOutcome::default();

    if cancel.is_some_and(CancellationToken::is_cancelled) {
        outcome.issues.push(Issue::Cancelled {
            group,
            instance_ids: ids(&instances),
        });
        outcome.unplaced = instances;
        return outcome;
    }

    let spec = match resolve_stock(key, stock, settings.stock_fallback) {
        StockMatch::Matched(spec) => spec,
        StockMatch::Fallback(spec) => {
            warn!(group = %group, stock = %spec.id, "no matching stock, falling back");
            outcome.issues.push(Issue::NoMatchingStock {
                group: group.clone(),
                fallback: Some(spec.id.clone()),
            });
            spec
        }
        StockMatch::Missing => {
            warn!(group = %group, panels = instances.len(), "no matching stock, group rejected");
            outcome.issues.push(Issue::NoMatchingStock {
                group,
                fallback: None,
            });
            outcome.unplaced = instances;
            return outcome;
        }
    };
    let Some(usable) = settings.trim.usable(spec.size()) else {
        // Stock is validated up front, so this only guards direct callers.
        outcome.unplaced = instances;
        return outcome;
    };

    let limits = settings.limits(spec.available);
    let packer = strategy.packer(settings.strip_tolerance);
    let mut allocation = allocate(
        usable,
        settings.kerf,
        instances.clone(),
        packer.as_ref(),
        &limits,
        cancel,
    );

    if settings.redistribute && settings.mode == OptimizationMode::Nesting {
        if let Redistribution::Improved(sheets) = redistribute(
            &allocation.sheets,
            &instances,
            settings.kerf,
            &settings.redistribution,
        ) {
            info!(
                group = %group,
                before = allocation.sheets.len(),
                after = sheets.len(),
                "redistributed sparse sheets"
            );
            allocation.sheets = sheets;
        }
    }

    for instance in &allocation.oversized {
        warn!(group = %group, panel = %instance.id, size = %instance.size, sheet = %usable, "panel larger than sheet");
        outcome.issues.push(Issue::Oversized {
            group: group.clone(),
            instance_id: instance.id.clone(),
            width: instance.size.w,
            height: instance.size.h,
            sheet_width: usable.w,
            sheet_height: usable.h,
        });
    }
    let left = ids(&allocation.unplaced);
    match allocation.stop {
        StopReason::Complete => {}
        StopReason::Stalled => outcome.issues.push(Issue::AllocationStalled {
            group: group.clone(),
            instance_ids: left,
        }),
        StopReason::CeilingReached => outcome.issues.push(Issue::SheetCeilingReached {
            group: group.clone(),
            max_sheets: limits.max_sheets,
            instance_ids: left,
        }),
        StopReason::BudgetExhausted => outcome.issues.push(Issue::BudgetExhausted {
            group: group.clone(),
            instance_ids: left,
        }),
        StopReason::Cancelled => outcome.issues.push(Issue::Cancelled {
            group: group.clone(),
            instance_ids: left,
        }),
    }

    for (n, packed) in allocation.sheets.into_iter().enumerate() {
        let sheet = SheetResult::new(
            format!("{group}-{}", n + 1),
            group.clone(),
            spec,
            settings.trim,
            usable,
            packed.panels,
        );
        for violation in validate_sheet(&sheet, settings.kerf) {
            warn!(sheet = %sheet.id, %violation, "invalid placement");
        }
        outcome.sheets.push(sheet);
    }

    info!(
        group = %group,
        stock = %spec.id,
        strategy = %strategy,
        sheets = outcome.sheets.len(),
        placed = outcome.sheets.iter().map(|s| s.panels.len()).sum::<usize>(),
        unplaced = allocation.oversized.len() + allocation.unplaced.len(),
        "group optimised"
    );

    outcome.unplaced = allocation.oversized;
    outcome.unplaced.extend(allocation.unplaced);
    outcome
}

/// Lays out every requested panel on stock sheets.
///
/// Groups are processed in key order and concatenated, so the result is the
/// same whether or not `settings.parallel` is set.
pub fn optimize(
    requests: &[PanelRequest],
    stock: &[StockSheetSpec],
    settings: &Settings,
    cancel: Option<&CancellationToken>,
) -> Result<Layout> {
    settings.validate()?;
    validate_requests(requests)?;
    validate_stock(stock, &settings.trim)?;
    let strategy = settings.resolve_strategy()?;
    let cut_style = settings.cut_style()?;

    let mut groups: BTreeMap<GroupKey, Vec<&PanelRequest>> = BTreeMap::new();
    for request in requests {
        groups
            .entry(GroupKey::for_request(request, settings.consider_material))
            .or_default()
            .push(request);
    }
    let groups: Vec<(GroupKey, Vec<&PanelRequest>)> = groups.into_iter().collect();

    let run = |(key, members): &(GroupKey, Vec<&PanelRequest>)| {
        run_group(key, members, stock, settings, strategy, cancel)
    };
    let outcomes: Vec<GroupOutcome> = if settings.parallel {
        groups.par_iter().map(run).collect()
    } else {
        groups.iter().map(run).collect()
    };

    let mut layout = Layout {
        sheets: Vec::new(),
        unplaced: Vec::new(),
        issues: Vec::new(),
        kerf: settings.kerf,
        cut_style,
    };
    for outcome in outcomes {
        layout.sheets.extend(outcome.sheets);
        layout.unplaced.extend(outcome.unplaced);
        layout.issues.extend(outcome.issues);
    }

    info!(
        groups = groups.len(),
        sheets = layout.sheet_count(),
        placed = layout.placed_count(),
        unplaced = layout.unplaced.len(),
        efficiency = layout.total_efficiency(),
        "optimisation finished"
    );
    Ok(layout)
}
