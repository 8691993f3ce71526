//! Routing of problems to reasoning backends

pub mod selection;

pub use selection::{
    OverrideCondition, PriorityOverride, ProviderSelectionPolicy, Selection, SelectionReason,
};
