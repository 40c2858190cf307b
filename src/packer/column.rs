use serde::{Deserialize, Serialize};

use super::{CUTSAW_WIDTH_TOLERANCE, PackOutcome, SheetPacker};
use crate::types::{PanelInstance, PlacedPanel, Rect};

/// How strictly a panel must match its column's width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnVariant {
    /// Any panel no wider than the column.
    #[default]
    Rip,
    /// Only panels within a few millimetres of the column width.
    Cutsaw,
}

#[derive(Debug, Clone, Copy)]
struct Column {
    x: u32,
    width: u32,
    cursor: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnPacker {
    variant: ColumnVariant,
}

impl ColumnPacker {
    pub fn new(variant: ColumnVariant) -> Self {
        Self { variant }
    }

    fn accepts(&self, column: &Column, width: u32) -> bool {
        match self.variant {
            ColumnVariant::Rip => width <= column.width,
            ColumnVariant::Cutsaw => {
                width <= column.width && column.width - width <= CUTSAW_WIDTH_TOLERANCE
            }
        }
    }
}

impl SheetPacker for ColumnPacker {
    fn pack(&self, sheet: Rect, kerf: u32, instances: &[PanelInstance]) -> PackOutcome {
        let mut order: Vec<&PanelInstance> = instances.iter().collect();
        match self.variant {
            ColumnVariant::Rip => {
                order.sort_by(|a, b| b.size.h.cmp(&a.size.h).then(a.size.w.cmp(&b.size.w)))
            }
            ColumnVariant::Cutsaw => {
                order.sort_by(|a, b| b.size.h.cmp(&a.size.h).then(b.size.w.cmp(&a.size.w)))
            }
        }

        let mut columns: Vec<Column> = Vec::new();
        let mut placed = Vec::new();

        for instance in order {
            // Existing columns, normal orientation before rotated
            let slot = instance.orientations().find_map(|(fp, rotated)| {
                columns
                    .iter_mut()
                    .find(|c| self.accepts(c, fp.w) && c.cursor + fp.h <= sheet.h)
                    .map(|c| {
                        let y = c.cursor;
                        c.cursor += fp.h + kerf;
                        (c.x, y, rotated)
                    })
            });
            if let Some((x, y, rotated)) = slot {
                placed.push(PlacedPanel::new(instance, x, y, rotated));
                continue;
            }

            let next_x = columns.last().map_or(0, |c| c.x + c.width + kerf);
            let opened = instance
                .orientations()
                .find(|(fp, _)| next_x + fp.w <= sheet.w && fp.h <= sheet.h);
            if let Some((fp, rotated)) = opened {
                columns.push(Column {
                    x: next_x,
                    width: fp.w,
                    cursor: fp.h + kerf,
                });
                placed.push(PlacedPanel::new(instance, next_x, 0, rotated));
            }
        }

        PackOutcome::new(placed, instances)
    }
}
