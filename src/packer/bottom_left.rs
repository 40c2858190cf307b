use super::{PackOutcome, Region, SheetPacker, by_area_then_aspect};
use crate::types::{PanelInstance, PlacedPanel, Rect};

/// Corner-candidate search: lowest `y`, then lowest `x`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BottomLeftPacker;

impl BottomLeftPacker {
    /// Places instances in the given order without re-sorting.
    pub fn pack_in_order<'a, I>(&self, sheet: Rect, kerf: u32, order: I) -> Vec<PlacedPanel>
    where
        I: IntoIterator<Item = &'a PanelInstance>,
    {
        let bounds = sheet.grown(kerf);
        let mut occupied: Vec<Region> = Vec::new();
        let mut placed = Vec::new();

        for instance in order {
            let found = instance.orientations().find_map(|(footprint, rotated)| {
                Self::find_position(&occupied, bounds, footprint.grown(kerf))
                    .map(|(x, y)| (x, y, footprint, rotated))
            });
            if let Some((x, y, footprint, rotated)) = found {
                occupied.push(Region::new(x, y, footprint.grown(kerf)));
                placed.push(PlacedPanel::new(instance, x, y, rotated));
            }
        }

        placed
    }

    fn candidates(occupied: &[Region]) -> Vec<(u32, u32)> {
        let mut points = vec![(0, 0)];
        for r in occupied {
            points.push((r.right(), r.y));
            points.push((r.x, r.bottom()));
            points.push((r.right(), r.bottom()));
            points.push((0, r.bottom()));
        }
        points.sort_by_key(|&(x, y)| (y, x));
        points.dedup();
        points
    }

    fn find_position(occupied: &[Region], bounds: Rect, needed: Rect) -> Option<(u32, u32)> {
        Self::candidates(occupied).into_iter().find(|&(x, y)| {
            if x + needed.w > bounds.w || y + needed.h > bounds.h {
                return false;
            }
            let probe = Region::new(x, y, needed);
            !occupied.iter().any(|r| r.intersects(&probe))
        })
    }
}

impl SheetPacker for BottomLeftPacker {
    fn pack(&self, sheet: Rect, kerf: u32, instances: &[PanelInstance]) -> PackOutcome {
        let mut order: Vec<&PanelInstance> = instances.iter().collect();
        order.sort_by(|a, b| by_area_then_aspect(a, b));
        let placed = self.pack_in_order(sheet, kerf, order);
        PackOutcome::new(placed, instances)
    }
}
