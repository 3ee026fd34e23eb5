//! Normalisation of raw provider dumps.
//!
//! The HTTP download itself happens elsewhere; these functions take the files
//! the providers publish and reduce them to monthly country series:
//! - OWID daily COVID cases → monthly cases per 100k
//! - OxCGRT daily stringency index → monthly mean
//! - Eurostat wide exports (one column per period) → long records

use std::collections::BTreeMap;
use std::io::Read;

use chrono::NaiveDate;
use tracing::{debug, info};

use super::error::DataError;
use super::source::{parse_value, SourceRecord, SourceTable};
use crate::domain::{Month, Region};

/// Stringency columns, in the order OxCGRT has published them over time.
pub const STRINGENCY_CANDIDATES: [&str; 4] = [
    "StringencyIndex",
    "StringencyIndex_Average",
    "StringencyIndex_ForDisplay",
    "StringencyIndex_Average_ForDisplay",
];

fn read_all<R: Read>(context: &str, reader: R) -> Result<(Vec<String>, Vec<csv::StringRecord>), DataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| DataError::csv(context, e))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    let rows = rdr
        .records()
        .collect::<Result<_, _>>()
        .map_err(|e| DataError::csv(context, e))?;
    Ok((headers, rows))
}

fn require(table: &str, headers: &[String], column: &str) -> Result<usize, DataError> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| DataError::MissingColumn {
            table: table.to_string(),
            column: column.to_string(),
        })
}

/// EU country from an ISO3 code; OWID aggregates (`OWID_EUR`) and non-EU
/// countries yield `None`.
fn eu_from_iso3(code: &str) -> Option<Region> {
    if code.len() != 3 {
        return None;
    }
    Region::parse(code).ok().filter(Region::is_eu)
}

/// Monthly COVID cases per 100k from OWID daily rows.
///
/// Input columns: `iso_code`, `date`, `new_cases`, `population`. Rows without
/// a date or population are dropped. Daily values are summed per month; a
/// month with no reported daily value stays missing.
pub fn aggregate_daily_cases<R: Read>(reader: R) -> Result<SourceTable, DataError> {
    const TABLE: &str = "owid_covid";
    let (headers, rows) = read_all(TABLE, reader)?;
    let iso = require(TABLE, &headers, "iso_code")?;
    let date = require(TABLE, &headers, "date")?;
    let cases = require(TABLE, &headers, "new_cases")?;
    let pop = require(TABLE, &headers, "population")?;

    let mut monthly: BTreeMap<(Region, Month), Option<f64>> = BTreeMap::new();
    for row in &rows {
        let Some(region) = row.get(iso).and_then(eu_from_iso3) else {
            continue;
        };
        let Ok(month) = Month::parse(row.get(date).unwrap_or("")) else {
            continue;
        };
        let population = row.get(pop).and_then(parse_value).unwrap_or(f64::NAN);
        if !population.is_finite() || population <= 0.0 {
            continue;
        }
        let new_cases = row.get(cases).and_then(parse_value).unwrap_or(f64::NAN);
        let entry = monthly.entry((region, month)).or_insert(None);
        if new_cases.is_finite() {
            let per_100k = new_cases / population * 100_000.0;
            *entry = Some(entry.unwrap_or(0.0) + per_100k);
        }
    }

    let mut table = SourceTable::new(TABLE, vec!["cases_per_100k".into()], true);
    table.records = monthly
        .into_iter()
        .map(|((region, month), total)| SourceRecord {
            region: Some(region),
            month,
            values: vec![total.unwrap_or(f64::NAN)],
        })
        .collect();
    info!(
        rows = table.records.len(),
        countries = table.region_count(),
        "aggregated daily COVID cases"
    );
    Ok(table)
}

/// Monthly mean policy stringency from OxCGRT daily rows.
///
/// Input columns: `CountryCode`, `Date` (`YYYYMMDD`, possibly without
/// leading zeros) and the first available stringency column.
pub fn aggregate_daily_stringency<R: Read>(reader: R) -> Result<SourceTable, DataError> {
    const TABLE: &str = "oxcgrt";
    let (headers, rows) = read_all(TABLE, reader)?;
    let country = require(TABLE, &headers, "CountryCode")?;
    let date = require(TABLE, &headers, "Date")?;
    let value = STRINGENCY_CANDIDATES
        .iter()
        .find_map(|c| headers.iter().position(|h| h == c))
        .ok_or_else(|| DataError::MissingColumn {
            table: TABLE.to_string(),
            column: STRINGENCY_CANDIDATES.join(" | "),
        })?;

    let mut sums: BTreeMap<(Region, Month), (f64, usize)> = BTreeMap::new();
    for row in &rows {
        let Some(region) = row.get(country).and_then(eu_from_iso3) else {
            continue;
        };
        let raw_date = format!("{:0>8}", row.get(date).unwrap_or(""));
        let Ok(day) = NaiveDate::parse_from_str(&raw_date, "%Y%m%d") else {
            continue;
        };
        let entry = sums.entry((region, Month::from_date(day))).or_insert((0.0, 0));
        let v = row.get(value).and_then(parse_value).unwrap_or(f64::NAN);
        if v.is_finite() {
            entry.0 += v;
            entry.1 += 1;
        }
    }

    let mut table = SourceTable::new(TABLE, vec!["policy_stringency".into()], true);
    table.records = sums
        .into_iter()
        .map(|((region, month), (sum, n))| SourceRecord {
            region: Some(region),
            month,
            values: vec![if n == 0 { f64::NAN } else { sum / n as f64 }],
        })
        .collect();
    info!(
        rows = table.records.len(),
        countries = table.region_count(),
        "aggregated daily stringency"
    );
    Ok(table)
}

/// Dimension filter for Eurostat exports: `column ∈ allowed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionFilter {
    pub column: String,
    pub allowed: Vec<String>,
}

impl DimensionFilter {
    pub fn new(column: &str, allowed: &[&str]) -> Self {
        Self {
            column: column.to_string(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Melt a Eurostat wide export into long records.
///
/// The geo column is the first header containing `geo` (exports label it
/// `geo\TIME_PERIOD`). Period columns are headers that parse as a month.
/// Only national EU rows (two-letter geo codes) are kept. Filters whose
/// column is absent are ignored.
pub fn eurostat_wide_to_long<R: Read>(
    reader: R,
    value_name: &str,
    filters: &[DimensionFilter],
) -> Result<SourceTable, DataError> {
    const TABLE: &str = "eurostat";
    let (headers, rows) = read_all(TABLE, reader)?;
    let geo = headers
        .iter()
        .position(|h| h.to_ascii_lowercase().contains("geo"))
        .ok_or_else(|| DataError::MissingColumn {
            table: TABLE.to_string(),
            column: "geo".to_string(),
        })?;
    let periods: Vec<(usize, Month)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != geo && h.chars().any(|c| c.is_ascii_digit()))
        .filter_map(|(i, h)| Month::parse(h).ok().map(|m| (i, m)))
        .collect();
    let active: Vec<(usize, &DimensionFilter)> = filters
        .iter()
        .filter_map(|f| headers.iter().position(|h| *h == f.column).map(|i| (i, f)))
        .collect();

    let mut table = SourceTable::new(TABLE, vec![value_name.to_string()], true);
    let mut skipped = 0usize;
    for row in &rows {
        let passes = active
            .iter()
            .all(|(i, f)| row.get(*i).is_some_and(|v| f.allowed.iter().any(|a| a == v)));
        if !passes {
            continue;
        }
        let code = row.get(geo).unwrap_or("");
        let region = match Region::parse(code) {
            Ok(r) if code.trim().len() == 2 && r.is_eu() => r,
            _ => {
                skipped += 1;
                continue;
            }
        };
        for (i, month) in &periods {
            let v = row.get(*i).and_then(parse_value).unwrap_or(f64::NAN);
            table.records.push(SourceRecord {
                region: Some(region.clone()),
                month: *month,
                values: vec![v],
            });
        }
    }
    debug!(
        value = value_name,
        records = table.records.len(),
        skipped_geo = skipped,
        "melted eurostat export"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(y: i32, mo: u32) -> Month {
        Month::new(y, mo).unwrap()
    }

    #[test]
    fn daily_cases_sum_per_month_per_100k() {
        let csv = "iso_code,location,date,new_cases,population\n\
                   DEU,Germany,2020-03-01,100,1000000\n\
                   DEU,Germany,2020-03-02,200,1000000\n\
                   DEU,Germany,2020-04-01,,1000000\n\
                   OWID_EUR,Europe,2020-03-01,5,100\n\
                   USA,United States,2020-03-01,5,100\n\
                   FRA,France,2020-03-01,50,\n";
        let t = aggregate_daily_cases(csv.as_bytes()).unwrap();
        assert_eq!(t.records.len(), 2);
        assert_eq!(t.records[0].month, m(2020, 3));
        assert!((t.records[0].values[0] - 30.0).abs() < 1e-9);
        // April only had a missing daily value
        assert!(t.records[1].values[0].is_nan());
    }

    #[test]
    fn stringency_is_monthly_mean_with_zero_padded_dates() {
        let csv = "CountryCode,Date,StringencyIndex_Average\n\
                   ITA,20200301,40\n\
                   ITA,20200302,60\n\
                   ITA,20200401,\n\
                   CAN,20200301,10\n";
        let t = aggregate_daily_stringency(csv.as_bytes()).unwrap();
        assert_eq!(t.columns, vec!["policy_stringency".to_string()]);
        assert_eq!(t.records.len(), 2);
        assert_eq!(t.records[0].region.as_ref().unwrap().as_str(), "IT");
        assert_eq!(t.records[0].values[0], 50.0);
        assert!(t.records[1].values[0].is_nan());
    }

    #[test]
    fn stringency_without_known_column_errors() {
        let csv = "CountryCode,Date,Other\nITA,20200301,1\n";
        assert!(matches!(
            aggregate_daily_stringency(csv.as_bytes()),
            Err(DataError::MissingColumn { .. })
        ));
    }

    #[test]
    fn eurostat_melt_filters_dimensions_and_regions() {
        let csv = "unit,s_adj,geo\\TIME_PERIOD,2020M01,2020M02\n\
                   PC_ACT,NSA,DE,3.4,3.5 p\n\
                   PC_ACT,SA,DE,9.9,9.9\n\
                   PC_ACT,NSA,EL,16.0,:\n\
                   PC_ACT,NSA,DE1,1.0,1.0\n\
                   PC_ACT,NSA,EU27_2020,6.0,6.1\n";
        let filters = [
            DimensionFilter::new("unit", &["PC_ACT"]),
            DimensionFilter::new("s_adj", &["NSA"]),
        ];
        let t = eurostat_wide_to_long(csv.as_bytes(), "unemployment_rate", &filters).unwrap();
        assert_eq!(t.records.len(), 4);
        assert_eq!(t.records[1].month, m(2020, 2));
        assert_eq!(t.records[1].values[0], 3.5);
        assert_eq!(t.records[2].region.as_ref().unwrap().as_str(), "GR");
        assert!(t.records[3].values[0].is_nan());
    }

    #[test]
    fn eurostat_quarters_land_on_first_month() {
        let csv = "geo,2020-Q1,2020-Q2\nFR,100,90\n";
        let t = eurostat_wide_to_long(csv.as_bytes(), "gdp", &[]).unwrap();
        assert_eq!(t.records[0].month, m(2020, 1));
        assert_eq!(t.records[1].month, m(2020, 4));
    }
}
