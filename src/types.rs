use serde::{Deserialize, Deserializer, Serialize};

/// Default board thickness in millimetres when a request or stock entry omits it.
pub const DEFAULT_THICKNESS: f64 = 18.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    #[serde(deserialize_with = "deserialize_u32_from_number")]
    pub w: u32,
    #[serde(deserialize_with = "deserialize_u32_from_number")]
    pub h: u32,
}

impl Rect {
    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn rotated(&self) -> Self {
        Self {
            w: self.h,
            h: self.w,
        }
    }

    pub fn fits_in(&self, other: &Rect) -> bool {
        self.w <= other.w && self.h <= other.h
    }

    /// Grows both sides by the kerf, i.e. the area a panel claims including
    /// its trailing saw clearance.
    pub fn grown(&self, kerf: u32) -> Self {
        Self {
            w: self.w.saturating_add(kerf),
            h: self.h.saturating_add(kerf),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn longest_side(&self) -> u32 {
        self.w.max(self.h)
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

/// Accepts integer or float JSON numbers for millimetre fields.
pub fn deserialize_u32_from_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 || value > u32::MAX as f64 {
        return Err(serde::de::Error::custom(format!(
            "expected a non-negative length, got {value}"
        )));
    }
    Ok(value.round() as u32)
}

/// Wood-grain constraint. Any locked grain forbids rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grain {
    #[default]
    None,
    LockedToWidth,
    LockedToHeight,
}

impl Grain {
    pub fn is_locked(&self) -> bool {
        !matches!(self, Grain::None)
    }
}

fn default_quantity() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_thickness() -> f64 {
    DEFAULT_THICKNESS
}

/// A requested part, before quantity expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRequest {
    pub id: String,
    #[serde(deserialize_with = "deserialize_u32_from_number")]
    pub width: u32,
    #[serde(deserialize_with = "deserialize_u32_from_number")]
    pub height: u32,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default = "default_thickness")]
    pub thickness: f64,
    #[serde(
        default = "default_quantity",
        deserialize_with = "deserialize_u32_from_number"
    )]
    pub quantity: u32,
    #[serde(default)]
    pub grain: Grain,
    #[serde(default = "default_true")]
    pub rotation_allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PanelRequest {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            material: None,
            thickness: DEFAULT_THICKNESS,
            quantity: 1,
            grain: Grain::None,
            rotation_allowed: true,
            name: None,
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn with_thickness(mut self, thickness: f64) -> Self {
        self.thickness = thickness;
        self
    }

    pub fn with_grain(mut self, grain: Grain) -> Self {
        self.grain = grain;
        self
    }

    pub fn with_rotation(mut self, allowed: bool) -> Self {
        self.rotation_allowed = allowed;
        self
    }

    pub fn size(&self) -> Rect {
        Rect::new(self.width, self.height)
    }

    /// Grain overrides the stored rotation flag.
    pub fn can_rotate(&self) -> bool {
        !self.grain.is_locked() && self.rotation_allowed
    }

    /// Expands the quantity into independent instances `"{id}-0"`, `"{id}-1"`, ...
    ///
    /// `allow_rotation` is a global switch ANDed with the request's own permission.
    pub fn expand(&self, allow_rotation: bool) -> impl Iterator<Item = PanelInstance> + '_ {
        let can_rotate = allow_rotation && self.can_rotate();
        (0..self.quantity).map(move |n| PanelInstance {
            id: format!("{}-{}", self.id, n),
            request_id: self.id.clone(),
            size: self.size(),
            can_rotate,
            grain: self.grain,
        })
    }
}

/// One physical copy of a requested panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelInstance {
    pub id: String,
    pub request_id: String,
    pub size: Rect,
    pub can_rotate: bool,
    pub grain: Grain,
}

impl PanelInstance {
    pub fn new(id: impl Into<String>, w: u32, h: u32, can_rotate: bool) -> Self {
        let id = id.into();
        Self {
            request_id: id.clone(),
            id,
            size: Rect::new(w, h),
            can_rotate,
            grain: Grain::None,
        }
    }

    pub fn area(&self) -> u64 {
        self.size.area()
    }

    /// Footprints worth trying, normal orientation first.
    pub fn orientations(&self) -> impl Iterator<Item = (Rect, bool)> {
        let rotated = (self.can_rotate && self.size.w != self.size.h)
            .then(|| (self.size.rotated(), true));
        std::iter::once((self.size, false)).chain(rotated)
    }

    pub fn fits(&self, sheet: Rect) -> bool {
        self.orientations().any(|(fp, _)| fp.fits_in(&sheet))
    }
}

/// A stock material definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSheetSpec {
    pub id: String,
    #[serde(deserialize_with = "deserialize_u32_from_number")]
    pub width: u32,
    #[serde(deserialize_with = "deserialize_u32_from_number")]
    pub height: u32,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default = "default_thickness")]
    pub thickness: f64,
    /// `None` means unlimited.
    #[serde(default)]
    pub available: Option<u32>,
}

impl StockSheetSpec {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            material: None,
            thickness: DEFAULT_THICKNESS,
            available: None,
        }
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn with_thickness(mut self, thickness: f64) -> Self {
        self.thickness = thickness;
        self
    }

    pub fn with_available(mut self, count: u32) -> Self {
        self.available = Some(count);
        self
    }

    pub fn size(&self) -> Rect {
        Rect::new(self.width, self.height)
    }
}

/// Edge margins removed from every sheet before packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimMargins {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl TrimMargins {
    pub fn uniform(margin: u32) -> Self {
        Self {
            top: margin,
            bottom: margin,
            left: margin,
            right: margin,
        }
    }

    /// Usable area left after trimming, or `None` if the margins consume the sheet.
    pub fn usable(&self, stock: Rect) -> Option<Rect> {
        let w = stock.w.checked_sub(self.left.checked_add(self.right)?)?;
        let h = stock.h.checked_sub(self.top.checked_add(self.bottom)?)?;
        let usable = Rect::new(w, h);
        (!usable.is_empty()).then_some(usable)
    }
}

/// A panel instance fixed at a position on a sheet.
///
/// `width`/`height` are the requested (unrotated) dimensions; use
/// [`PlacedPanel::footprint`] for the occupied area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedPanel {
    pub instance_id: String,
    pub request_id: String,
    pub x: u32,
    pub y: u32,
    pub rotated: bool,
    pub width: u32,
    pub height: u32,
}

impl PlacedPanel {
    pub fn new(instance: &PanelInstance, x: u32, y: u32, rotated: bool) -> Self {
        Self {
            instance_id: instance.id.clone(),
            request_id: instance.request_id.clone(),
            x,
            y,
            rotated,
            width: instance.size.w,
            height: instance.size.h,
        }
    }

    pub fn footprint(&self) -> Rect {
        if self.rotated {
            Rect::new(self.height, self.width)
        } else {
            Rect::new(self.width, self.height)
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.footprint().w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.footprint().h
    }

    pub fn area(&self) -> u64 {
        self.footprint().area()
    }
}

pub fn efficiency(used_area: u64, sheet: Rect) -> f64 {
    if sheet.area() == 0 {
        return 0.0;
    }
    used_area as f64 / sheet.area() as f64
}

/// One produced stock sheet.
///
/// Placement coordinates are relative to the usable (trimmed) area of
/// `width` x `height`; [`SheetResult::to_stock_coords`] maps them back onto
/// the untrimmed board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetResult {
    pub id: String,
    pub group: String,
    pub stock_id: String,
    pub stock: Rect,
    pub trim: TrimMargins,
    pub width: u32,
    pub height: u32,
    pub panels: Vec<PlacedPanel>,
    pub used_area: u64,
    pub efficiency: f64,
}

impl SheetResult {
    pub fn new(
        id: String,
        group: String,
        stock: &StockSheetSpec,
        trim: TrimMargins,
        usable: Rect,
        panels: Vec<PlacedPanel>,
    ) -> Self {
        let used_area = panels.iter().map(PlacedPanel::area).sum();
        Self {
            id,
            group,
            stock_id: stock.id.clone(),
            stock: stock.size(),
            trim,
            width: usable.w,
            height: usable.h,
            panels,
            used_area,
            efficiency: efficiency(used_area, usable),
        }
    }

    pub fn size(&self) -> Rect {
        Rect::new(self.width, self.height)
    }

    pub fn waste_area(&self) -> u64 {
        self.size().area().saturating_sub(self.used_area)
    }

    pub fn to_stock_coords(&self, panel: &PlacedPanel) -> (u32, u32) {
        (panel.x + self.trim.left, panel.y + self.trim.top)
    }
}
