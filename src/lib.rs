//! Panel cutting optimiser.
//!
//! Lays rectangular furniture panels out on stock sheets, honouring saw kerf,
//! grain direction, rotation permission and trim margins, then derives the
//! saw cuts that produce them.
//!
//! ```no_run
//! use panel_optimizer::{PanelRequest, Settings, StockSheetSpec, optimize};
//!
//! let panels = [PanelRequest::new("side", 720, 560).with_quantity(2)];
//! let stock = [StockSheetSpec::new("pb-18", 2800, 2070)];
//! let layout = optimize(&panels, &stock, &Settings::default(), None)?;
//! println!("{} sheet(s), {:.1}% waste", layout.sheet_count(), layout.total_waste_percent());
//! # Ok::<(), panel_optimizer::Error>(())
//! ```

pub mod allocator;
pub mod cuts;
pub mod error;
pub mod optimizer;
pub mod packer;
pub mod types;
pub mod validate;

pub use allocator::{CancellationToken, RedistributionPolicy};
pub use cuts::{CutAxis, CutStep, CutStyle, SawStats, saw_stats};
pub use error::{Error, Issue, Result};
pub use optimizer::{Job, Layout, OptimizationMode, Settings, StockFallback, optimize};
pub use packer::{SheetPacker, Strategy};
pub use types::{
    Grain, PanelInstance, PanelRequest, PlacedPanel, Rect, SheetResult, StockSheetSpec,
    TrimMargins,
};
