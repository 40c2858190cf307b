use serde::{Deserialize, Serialize};

use super::{AREA_SIMILARITY_MM2, PackOutcome, Region, SheetPacker};
use crate::types::{PanelInstance, PlacedPanel, Rect};

pub type FreeRect = Region;

/// Scoring rule for choosing among free rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[allow(clippy::enum_variant_names)]
pub enum FitHeuristic {
    #[default]
    BestAreaFit,
    BestShortSideFit,
    BestLongSideFit,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoredPlacement {
    pub free_idx: usize,
    pub rotated: bool,
    pub score: (u64, u64),
}

/// Free-rectangle bookkeeping for one sheet.
///
/// All rectangles live in kerf-grown space: the sheet is `w + kerf` by
/// `h + kerf` and each placed footprint occupies `fw + kerf` by `fh + kerf`.
#[derive(Debug, Clone)]
pub struct FreeRectBin {
    kerf: u32,
    pub free_rects: Vec<FreeRect>,
    pub placements: Vec<PlacedPanel>,
}

impl FreeRectBin {
    pub fn new(sheet: Rect, kerf: u32) -> Self {
        Self {
            kerf,
            free_rects: vec![FreeRect::new(0, 0, sheet.grown(kerf))],
            placements: Vec::new(),
        }
    }

    pub fn find_best(
        &self,
        instance: &PanelInstance,
        heuristic: FitHeuristic,
    ) -> Option<ScoredPlacement> {
        let mut best: Option<ScoredPlacement> = None;

        for (idx, free) in self.free_rects.iter().enumerate() {
            for (footprint, rotated) in instance.orientations() {
                let needed = footprint.grown(self.kerf);
                if !needed.fits_in(&free.rect) {
                    continue;
                }
                let score = Self::score(needed, free.rect, heuristic);
                if best.is_none_or(|b| score < b.score) {
                    best = Some(ScoredPlacement {
                        free_idx: idx,
                        rotated,
                        score,
                    });
                }
            }
        }

        best
    }

    fn score(piece: Rect, free: Rect, heuristic: FitHeuristic) -> (u64, u64) {
        let short = std::cmp::min(free.w - piece.w, free.h - piece.h) as u64;
        let long = std::cmp::max(free.w - piece.w, free.h - piece.h) as u64;
        match heuristic {
            FitHeuristic::BestAreaFit => (free.area() - piece.area(), short),
            FitHeuristic::BestShortSideFit => (short, long),
            FitHeuristic::BestLongSideFit => (long, short),
        }
    }

    pub fn place(&mut self, scored: ScoredPlacement, instance: &PanelInstance) -> &PlacedPanel {
        let free = self.free_rects[scored.free_idx];
        let placement = PlacedPanel::new(instance, free.x, free.y, scored.rotated);
        let used = placement.footprint().grown(self.kerf);

        self.free_rects.swap_remove(scored.free_idx);
        self.split(free, used);
        self.prune_contained();
        self.merge_free_rects();

        self.placements.push(placement);
        &self.placements[self.placements.len() - 1]
    }

    /// Right remainder keeps the used height, bottom remainder spans the full width.
    fn split(&mut self, free: FreeRect, used: Rect) {
        let right_w = free.rect.w - used.w;
        let bottom_h = free.rect.h - used.h;

        if right_w > 0 {
            self.free_rects.push(FreeRect::new(
                free.x + used.w,
                free.y,
                Rect::new(right_w, used.h),
            ));
        }
        if bottom_h > 0 {
            self.free_rects.push(FreeRect::new(
                free.x,
                free.y + used.h,
                Rect::new(free.rect.w, bottom_h),
            ));
        }
    }

    fn prune_contained(&mut self) {
        let mut i = 0;
        while i < self.free_rects.len() {
            let current = self.free_rects[i];
            let covered = self
                .free_rects
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other.contains(&current) && (other != &current || j < i));
            if covered {
                self.free_rects.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn merge_free_rects(&mut self) {
        let mut merged = true;
        while merged {
            merged = false;
            'outer: for i in 0..self.free_rects.len() {
                for j in (i + 1)..self.free_rects.len() {
                    if let Some(m) = Self::try_merge(self.free_rects[i], self.free_rects[j]) {
                        self.free_rects[i] = m;
                        self.free_rects.swap_remove(j);
                        merged = true;
                        break 'outer;
                    }
                }
            }
        }
    }

    fn try_merge(a: FreeRect, b: FreeRect) -> Option<FreeRect> {
        // Side by side with the same height
        if a.y == b.y && a.rect.h == b.rect.h {
            if a.right() == b.x {
                return Some(FreeRect::new(a.x, a.y, Rect::new(a.rect.w + b.rect.w, a.rect.h)));
            }
            if b.right() == a.x {
                return Some(FreeRect::new(b.x, b.y, Rect::new(a.rect.w + b.rect.w, a.rect.h)));
            }
        }
        // Stacked with the same width
        if a.x == b.x && a.rect.w == b.rect.w {
            if a.bottom() == b.y {
                return Some(FreeRect::new(a.x, a.y, Rect::new(a.rect.w, a.rect.h + b.rect.h)));
            }
            if b.bottom() == a.y {
                return Some(FreeRect::new(b.x, b.y, Rect::new(a.rect.w, a.rect.h + b.rect.h)));
            }
        }
        None
    }
}

/// Free-rectangle packer scoring every free rectangle per instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestAreaFitPacker {
    heuristic: FitHeuristic,
}

impl BestAreaFitPacker {
    pub fn new(heuristic: FitHeuristic) -> Self {
        Self { heuristic }
    }
}

/// Area descending; near-equal areas go longest side first.
fn by_area_then_longest_side(a: &PanelInstance, b: &PanelInstance) -> std::cmp::Ordering {
    if a.area().abs_diff(b.area()) < AREA_SIMILARITY_MM2 {
        b.size.longest_side().cmp(&a.size.longest_side())
    } else {
        b.area().cmp(&a.area())
    }
}

impl SheetPacker for BestAreaFitPacker {
    fn pack(&self, sheet: Rect, kerf: u32, instances: &[PanelInstance]) -> PackOutcome {
        let mut order: Vec<&PanelInstance> = instances.iter().collect();
        // Bucket first so the similarity tie-break stays a total order
        order.sort_by(|&a, &b| {
            let bucket = |i: &PanelInstance| i.area() / AREA_SIMILARITY_MM2;
            bucket(b).cmp(&bucket(a)).then_with(|| by_area_then_longest_side(a, b))
        });

        let mut bin = FreeRectBin::new(sheet, kerf);
        for instance in order {
            if let Some(scored) = bin.find_best(instance, self.heuristic) {
                bin.place(scored, instance);
            }
        }

        PackOutcome::new(bin.placements, instances)
    }
}
