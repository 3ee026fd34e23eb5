//! Parquet snapshots of feature panels.
//!
//! Layout: `{dir}/panel={NAME}.parquet` with a `{dir}/panel={NAME}.meta.json`
//! sidecar.
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (schema check, content hash)
//! - Quarantine for corrupt files (`{filename}.quarantined`)

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::error::DataError;
use super::schema::PanelSchema;
use crate::domain::{DuplicatePolicy, Month, Panel, PanelKey, Region};

/// Metadata sidecar for a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub name: String,
    pub rows: usize,
    pub regions: usize,
    pub first_month: Option<Month>,
    pub last_month: Option<Month>,
    pub columns: Vec<String>,
    pub content_hash: String,
    pub written_at: chrono::NaiveDateTime,
}

/// Directory of panel snapshots.
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("panel={name}.parquet"))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("panel={name}.meta.json"))
    }

    /// Write a panel snapshot. Writes are atomic: write to .tmp then rename.
    pub fn write(&self, name: &str, panel: &Panel) -> Result<SnapshotMeta, DataError> {
        if panel.is_empty() {
            return Err(DataError::Cache("refusing to snapshot an empty panel".into()));
        }
        fs::create_dir_all(&self.dir)
            .map_err(|e| DataError::Cache(format!("failed to create dir: {e}")))?;

        let mut df = panel_to_dataframe(panel)?;
        let path = self.data_path(name);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&mut df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Cache(format!("atomic rename failed: {e}"))
        })?;

        let range = panel.month_range();
        let meta = SnapshotMeta {
            name: name.to_string(),
            rows: panel.len(),
            regions: panel.regions().len(),
            first_month: range.map(|r| r.0),
            last_month: range.map(|r| r.1),
            columns: panel.column_names().to_vec(),
            content_hash: panel.content_hash(),
            written_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Cache(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(name), meta_json)
            .map_err(|e| DataError::Cache(format!("meta write: {e}")))?;

        info!(snapshot = name, rows = meta.rows, path = %path.display(), "wrote snapshot");
        Ok(meta)
    }

    /// Load a snapshot. A file that fails validation is quarantined.
    pub fn load(&self, name: &str) -> Result<Panel, DataError> {
        let path = self.data_path(name);
        if !path.exists() {
            return Err(DataError::NoSnapshot {
                name: name.to_string(),
            });
        }
        let meta = self.get_meta(name);

        let loaded = load_and_validate_parquet(&path).and_then(|panel| {
            match &meta {
                Some(m) if m.content_hash != panel.content_hash() => Err(DataError::Validation(
                    "content hash does not match sidecar".into(),
                )),
                _ => Ok(panel),
            }
        });
        match loaded {
            Ok(panel) => Ok(panel),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(path = %path.display(), error = %e, "quarantining corrupt snapshot");
                let _ = fs::rename(&path, &quarantine);
                let _ = fs::remove_file(self.meta_path(name));
                Err(e)
            }
        }
    }

    pub fn get_meta(&self, name: &str) -> Option<SnapshotMeta> {
        let content = fs::read_to_string(self.meta_path(name)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Metadata of every snapshot in the directory, sorted by name.
    pub fn status(&self) -> Result<Vec<SnapshotStatus>, DataError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.dir).map_err(|e| DataError::Cache(format!("read dir: {e}")))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::Cache(format!("dir entry: {e}")))?;
            let file = entry.file_name().to_string_lossy().into_owned();
            let Some(name) = file
                .strip_prefix("panel=")
                .and_then(|s| s.strip_suffix(".parquet"))
            else {
                continue;
            };
            out.push(SnapshotStatus {
                name: name.to_string(),
                meta: self.get_meta(name),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

/// A snapshot on disk; `meta` is `None` when the sidecar is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStatus {
    pub name: String,
    pub meta: Option<SnapshotMeta>,
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn panel_to_dataframe(panel: &Panel) -> Result<DataFrame, DataError> {
    let regions: Vec<String> = panel.keys().iter().map(|k| k.region.to_string()).collect();
    let months: Vec<i32> = panel
        .keys()
        .iter()
        .map(|k| (k.month.to_date() - epoch()).num_days() as i32)
        .collect();

    let mut columns = vec![
        Column::new("region".into(), regions),
        Column::new("month".into(), months)
            .cast(&DataType::Date)
            .map_err(|e| DataError::Parquet(format!("month cast: {e}")))?,
    ];
    for name in panel.column_names() {
        let values = panel.require_column(name)?.to_vec();
        columns.push(Column::new(name.as_str().into(), values));
    }
    DataFrame::new(columns).map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file = fs::File::create(path).map_err(|e| DataError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Panel, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::Validation("empty parquet file".into()));
    }
    let columns = PanelSchema::value_columns(&df);
    PanelSchema::validate(&df, &columns)?;
    dataframe_to_panel(&df, columns)
}

fn dataframe_to_panel(df: &DataFrame, columns: Vec<String>) -> Result<Panel, DataError> {
    let map_err = |e: PolarsError| DataError::Parquet(format!("column read: {e}"));

    let region_ca = df
        .column("region")
        .map_err(map_err)?
        .str()
        .map_err(|e| DataError::Parquet(format!("region column type: {e}")))?;
    let month_ca = df
        .column("month")
        .map_err(map_err)?
        .date()
        .map_err(|e| DataError::Parquet(format!("month column type: {e}")))?;
    let value_cas = columns
        .iter()
        .map(|c| {
            df.column(c)
                .map_err(map_err)?
                .f64()
                .map_err(|e| DataError::Parquet(format!("{c} column type: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let n = df.height();
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let region = region_ca
            .get(i)
            .ok_or_else(|| DataError::Parquet(format!("null region at row {i}")))?;
        let region = Region::parse(region)
            .map_err(|e| DataError::Validation(format!("row {i}: {e}")))?;
        let days = month_ca
            .get(i)
            .ok_or_else(|| DataError::Parquet(format!("null month at row {i}")))?;
        let month = Month::from_date(epoch() + chrono::Duration::days(days as i64));
        let values = value_cas
            .iter()
            .map(|ca| ca.get(i).unwrap_or(f64::NAN))
            .collect();
        rows.push((PanelKey::new(region, month), values));
    }

    Ok(Panel::from_rows(columns, rows, DuplicatePolicy::Reject)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_cache_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = env::temp_dir().join(format!("recoverylab_test_{}_{id}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_panel() -> Panel {
        let key = |r: &str, m: u32| PanelKey::new(Region::parse(r).unwrap(), Month::new(2020, m).unwrap());
        Panel::from_rows(
            vec!["nights_spent".into(), "gdp_lag1".into()],
            vec![
                (key("DE", 1), vec![100.0, f64::NAN]),
                (key("DE", 2), vec![90.0, 1.5]),
                (key("FR", 1), vec![80.0, f64::NAN]),
            ],
            DuplicatePolicy::Reject,
        )
        .unwrap()
    }

    #[test]
    fn write_and_load_roundtrip() {
        let dir = temp_cache_dir();
        let cache = SnapshotCache::new(&dir);

        let panel = sample_panel();
        cache.write("features", &panel).unwrap();
        let loaded = cache.load("features").unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.column_names(), panel.column_names());
        assert_eq!(loaded.content_hash(), panel.content_hash());
        assert!(loaded.value(0, "gdp_lag1").is_nan());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_nonexistent_returns_error() {
        let dir = temp_cache_dir();
        let cache = SnapshotCache::new(&dir);

        assert!(matches!(
            cache.load("absent"),
            Err(DataError::NoSnapshot { .. })
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn meta_and_status() {
        let dir = temp_cache_dir();
        let cache = SnapshotCache::new(&dir);

        let meta = cache.write("features", &sample_panel()).unwrap();
        assert_eq!(meta.rows, 3);
        assert_eq!(meta.regions, 2);
        assert_eq!(meta.first_month, Some(Month::new(2020, 1).unwrap()));

        let status = cache.status().unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].name, "features");
        assert_eq!(status[0].meta.as_ref().unwrap(), &meta);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = temp_cache_dir();
        let cache = SnapshotCache::new(&dir);

        cache.write("features", &sample_panel()).unwrap();
        fs::write(dir.join("panel=features.parquet"), b"not parquet").unwrap();

        assert!(cache.load("features").is_err());
        assert!(dir.join("panel=features.parquet.quarantined").exists());
        assert!(!dir.join("panel=features.parquet").exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
