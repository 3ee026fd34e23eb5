//! Property tests for panel and feature invariants.
//!
//! Uses proptest to verify:
//! 1. Panel ordering: any row set builds a sorted panel with unique keys
//! 2. No look-ahead: lags, growth and rolling means at month t are unchanged
//!    when every month after t is removed
//! 3. Region isolation: filling and interpolation never move values across
//!    regions

use proptest::prelude::*;
use recoverylab_core::data::clean::{fill_column, interpolate_column};
use recoverylab_core::domain::{DuplicatePolicy, Month, Panel, PanelKey, Region};
use recoverylab_core::features::{apply, Lag, RollingMean, Transform, YoyGrowth};

const REGIONS: [&str; 3] = ["DE", "FR", "IT"];

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_key() -> impl Strategy<Value = PanelKey> {
    (0..REGIONS.len(), 0i64..48).prop_map(|(r, offset)| {
        let start = Month::new(2018, 1).unwrap();
        PanelKey::new(Region::parse(REGIONS[r]).unwrap(), start.add_months(offset))
    })
}

fn arb_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        4 => (1.0..1000.0_f64),
        1 => Just(f64::NAN),
    ]
}

fn arb_rows() -> impl Strategy<Value = Vec<(PanelKey, Vec<f64>)>> {
    prop::collection::vec((arb_key(), arb_value()), 1..120)
        .prop_map(|rows| rows.into_iter().map(|(k, v)| (k, vec![v])).collect())
}

fn build(rows: Vec<(PanelKey, Vec<f64>)>) -> Panel {
    Panel::from_rows(vec!["x".into()], rows, DuplicatePolicy::KeepFirst).unwrap()
}

fn same(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

// ── 1. Panel Ordering ────────────────────────────────────────────────

proptest! {
    /// Keys come out strictly increasing, whatever the input order.
    #[test]
    fn panel_keys_sorted_and_unique(rows in arb_rows()) {
        let panel = build(rows.clone());
        prop_assert!(panel.validate().is_ok());
        for pair in panel.keys().windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
        let mut distinct: Vec<&PanelKey> = rows.iter().map(|(k, _)| k).collect();
        distinct.sort();
        distinct.dedup();
        prop_assert_eq!(panel.len(), distinct.len());
    }

    /// Keep-first keeps the earliest input row of each key.
    #[test]
    fn keep_first_takes_earliest_duplicate(rows in arb_rows()) {
        let panel = build(rows.clone());
        for (row, key) in panel.keys().iter().enumerate() {
            let first = rows.iter().find(|(k, _)| k == key).map(|(_, v)| v[0]).unwrap();
            prop_assert!(same(panel.value(row, "x"), first));
        }
    }

    /// Reject fails exactly when the input holds a duplicate key.
    #[test]
    fn reject_policy_detects_duplicates(rows in arb_rows()) {
        let mut keys: Vec<&PanelKey> = rows.iter().map(|(k, _)| k).collect();
        keys.sort();
        let has_dup = keys.windows(2).any(|w| w[0] == w[1]);
        let result = Panel::from_rows(vec!["x".into()], rows.clone(), DuplicatePolicy::Reject);
        prop_assert_eq!(result.is_err(), has_dup);
    }
}

// ── 2. No Look-Ahead ─────────────────────────────────────────────────

fn transforms() -> Vec<Box<dyn Transform>> {
    vec![
        Box::new(Lag::new("x", 1)),
        Box::new(Lag::new("x", 3)),
        Box::new(YoyGrowth::new("x")),
        Box::new(RollingMean::new("x", 3)),
    ]
}

proptest! {
    /// Truncating the panel after a cutoff month leaves every derived value
    /// at or before the cutoff unchanged.
    #[test]
    fn features_ignore_future_months(rows in arb_rows(), cutoff in 0i64..48) {
        let panel = build(rows);
        let cutoff = Month::new(2018, 1).unwrap().add_months(cutoff);
        let truncated = panel.filter_rows(|_, k| k.month <= cutoff);

        let full = apply(&panel, &transforms()).unwrap();
        let cut = apply(&truncated, &transforms()).unwrap();

        for (row, key) in cut.keys().iter().enumerate() {
            let full_row = full.row_of(&key.region, key.month).unwrap();
            for name in ["x_lag1", "x_lag3", "x_yoy", "x_ma3"] {
                prop_assert!(
                    same(cut.value(row, name), full.value(full_row, name)),
                    "{} differs at {} {}", name, key.region, key.month
                );
            }
        }
    }

    /// The first k months of every region have a missing lag-k value.
    #[test]
    fn leading_lags_are_missing(rows in arb_rows()) {
        let panel = apply(&build(rows), &transforms()).unwrap();
        for (_, range) in panel.region_ranges() {
            let first = panel.key(range.start).month;
            for row in range {
                if panel.key(row).month.months_between(first).abs() < 3 {
                    prop_assert!(panel.value(row, "x_lag3").is_nan());
                }
            }
        }
    }
}

// ── 3. Region Isolation ──────────────────────────────────────────────

proptest! {
    /// A region with no observed values stays fully missing after fill and
    /// interpolation, whatever its neighbours hold.
    #[test]
    fn fill_never_crosses_regions(rows in arb_rows(), empty in 0..REGIONS.len()) {
        let empty = Region::parse(REGIONS[empty]).unwrap();
        let rows: Vec<_> = rows
            .into_iter()
            .map(|(k, v)| if k.region == empty { (k, vec![f64::NAN]) } else { (k, v) })
            .collect();
        let mut panel = build(rows);
        interpolate_column(&mut panel, "x", None).unwrap();
        fill_column(&mut panel, "x").unwrap();

        for (row, key) in panel.keys().iter().enumerate() {
            if key.region == empty {
                prop_assert!(panel.value(row, "x").is_nan());
            }
        }
    }

    /// Filled values always come from an observed value of the same region.
    #[test]
    fn filled_values_come_from_own_region(rows in arb_rows()) {
        let original = build(rows);
        let mut filled = original.clone();
        fill_column(&mut filled, "x").unwrap();
        for (region, range) in original.region_ranges() {
            let observed: Vec<f64> = range
                .clone()
                .map(|r| original.value(r, "x"))
                .filter(|v| !v.is_nan())
                .collect();
            for row in range {
                let v = filled.value(row, "x");
                if !v.is_nan() {
                    prop_assert!(observed.contains(&v), "{} got foreign value {}", region, v);
                }
            }
        }
    }
}
