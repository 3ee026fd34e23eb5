//! Source loading, merge, cleaning and snapshot storage

pub mod cache;
pub mod clean;
pub mod csv_io;
pub mod error;
pub mod merge;
pub mod raw;
pub mod schema;
pub mod source;
pub mod summary;

pub use cache::{SnapshotCache, SnapshotMeta, SnapshotStatus};
pub use clean::{clean_panel, clean_with_features, interpolate_panel, CleanConfig, CleanReport};
pub use csv_io::{read_panel, read_panel_csv, write_panel, write_panel_csv};
pub use error::DataError;
pub use merge::{load_raw_dir, merge_sources, MergePlan, MergeReport};
pub use raw::{aggregate_daily_cases, aggregate_daily_stringency, eurostat_wide_to_long, DimensionFilter};
pub use schema::{PanelSchema, SchemaError};
pub use source::{SourceRecord, SourceTable};
pub use summary::{completeness_by_year, correlation_matrix, CorrelationMatrix, YearCompleteness};
