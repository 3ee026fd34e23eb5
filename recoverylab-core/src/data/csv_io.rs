//! Panel CSV interchange: `region,month,<columns...>`.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use super::error::DataError;
use super::source::{format_value, SourceTable};
use crate::domain::{DuplicatePolicy, Panel};

/// Read a processed panel. Duplicate keys are an error here: a processed
/// file that contains them was not produced by this pipeline.
pub fn read_panel_csv<R: Read>(name: &str, reader: R) -> Result<Panel, DataError> {
    let (table, stats) = SourceTable::from_reader(name, reader)?;
    if stats.bad_month > 0 || stats.bad_region > 0 {
        return Err(DataError::Validation(format!(
            "{name}: {} rows with bad month, {} with bad region",
            stats.bad_month, stats.bad_region
        )));
    }
    table.into_panel(DuplicatePolicy::Reject)
}

pub fn read_panel(path: &Path) -> Result<Panel, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::io(path, e))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "panel".to_string());
    read_panel_csv(&name, file)
}

pub fn write_panel_csv<W: Write>(panel: &Panel, writer: W) -> Result<(), DataError> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec!["region".to_string(), "month".to_string()];
    header.extend(panel.column_names().iter().cloned());
    wtr.write_record(&header).map_err(|e| DataError::csv("panel", e))?;

    let columns: Vec<&[f64]> = panel
        .column_names()
        .iter()
        .filter_map(|c| panel.column(c))
        .collect();
    for (row, key) in panel.keys().iter().enumerate() {
        let mut record = Vec::with_capacity(header.len());
        record.push(key.region.to_string());
        record.push(key.month.to_string());
        record.extend(columns.iter().map(|c| format_value(c[row])));
        wtr.write_record(&record).map_err(|e| DataError::csv("panel", e))?;
    }
    wtr.flush().map_err(|e| DataError::io("panel", e))?;
    Ok(())
}

/// Write a panel, creating parent directories.
pub fn write_panel(panel: &Panel, path: &Path) -> Result<(), DataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
    }
    let file = fs::File::create(path).map_err(|e| DataError::io(path, e))?;
    write_panel_csv(panel, file)
}
