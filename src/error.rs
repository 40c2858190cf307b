use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Malformed input, rejected before any packing starts.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid panel '{id}': {reason}")]
    InvalidPanel { id: String, reason: String },

    #[error("duplicate panel id '{0}'")]
    DuplicatePanelId(String),

    #[error("invalid stock sheet '{id}': {reason}")]
    InvalidStock { id: String, reason: String },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("strategy '{strategy}' cannot be used in {mode} mode")]
    StrategyModeMismatch { strategy: String, mode: String },
}

/// Recoverable condition reported alongside a (possibly partial) layout.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    #[error(
        "panel {instance_id} ({width}x{height}) does not fit a {sheet_width}x{sheet_height} sheet in any allowed orientation"
    )]
    Oversized {
        group: String,
        instance_id: String,
        width: u32,
        height: u32,
        sheet_width: u32,
        sheet_height: u32,
    },

    #[error("group {group}: packing stalled with {count} panel(s) left", count = .instance_ids.len())]
    AllocationStalled {
        group: String,
        instance_ids: Vec<String>,
    },

    #[error("group {group}: no stock matches material and thickness{}", fallback_note(.fallback))]
    NoMatchingStock {
        group: String,
        fallback: Option<String>,
    },

    #[error("group {group}: sheet limit of {max_sheets} reached with {count} panel(s) left", count = .instance_ids.len())]
    SheetCeilingReached {
        group: String,
        max_sheets: usize,
        instance_ids: Vec<String>,
    },

    #[error("group {group}: time or iteration budget exhausted with {count} panel(s) left", count = .instance_ids.len())]
    BudgetExhausted {
        group: String,
        instance_ids: Vec<String>,
    },

    #[error("group {group}: cancelled with {count} panel(s) left", count = .instance_ids.len())]
    Cancelled {
        group: String,
        instance_ids: Vec<String>,
    },
}

fn fallback_note(fallback: &Option<String>) -> String {
    match fallback {
        Some(id) => format!(", using '{id}'"),
        None => ", group rejected".to_string(),
    }
}

impl Issue {
    pub fn group(&self) -> &str {
        match self {
            Issue::Oversized { group, .. }
            | Issue::AllocationStalled { group, .. }
            | Issue::NoMatchingStock { group, .. }
            | Issue::SheetCeilingReached { group, .. }
            | Issue::BudgetExhausted { group, .. }
            | Issue::Cancelled { group, .. } => group,
        }
    }
}
