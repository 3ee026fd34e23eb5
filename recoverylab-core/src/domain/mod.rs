//! Core domain types: regions, months, and the panel dataset.

pub mod month;
pub mod panel;
pub mod region;

pub use month::Month;
pub use panel::{DuplicatePolicy, Panel, PanelError, PanelKey};
pub use region::{iso3_to_iso2, Region, EU_MEMBERS};

use thiserror::Error;

/// Parse errors for identifiers coming out of raw files.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("invalid region code '{0}'")]
    InvalidRegion(String),

    #[error("unknown ISO-3166 alpha-3 code '{0}' (only EU member states are mapped)")]
    UnknownIso3(String),

    #[error("invalid month '{0}'")]
    InvalidMonth(String),
}
