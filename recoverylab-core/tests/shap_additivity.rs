//! Property tests for attribution invariants.
//!
//! Uses proptest to verify:
//! 1. TreeSHAP local accuracy: base value plus attributions equals the
//!    boosted model's prediction, missing inputs included
//! 2. Permutation local accuracy for non-tree models
//! 3. Features a model never splits on receive zero attribution

use proptest::prelude::*;
use recoverylab_core::explain::{compute_shap, PermutationShap, ShapConfig, ShapMethod, TreeShap};
use recoverylab_core::models::{GbmParams, GradientBoosting, Matrix, OlsRegressor, Regressor};
use recoverylab_core::rng::RngHierarchy;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_cell() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => (-5.0..5.0_f64),
        1 => Just(f64::NAN),
    ]
}

/// 40 rows of three features; the target ignores `noise`.
fn arb_dataset() -> impl Strategy<Value = (Matrix, Vec<f64>)> {
    prop::collection::vec((arb_cell(), arb_cell(), arb_cell()), 40).prop_map(|rows| {
        let y: Vec<f64> = rows
            .iter()
            .map(|(a, b, _)| {
                let a = if a.is_nan() { 0.0 } else { *a };
                let b = if b.is_nan() { 1.0 } else { *b };
                2.0 * a + if b > 0.0 { 3.0 } else { -1.0 }
            })
            .collect();
        let rows = rows.into_iter().map(|(a, b, c)| vec![a, b, c]).collect();
        let x = Matrix::from_rows(vec!["a".into(), "b".into(), "noise".into()], rows).unwrap();
        (x, y)
    })
}

fn boosted(x: &Matrix, y: &[f64], seed: u64) -> GradientBoosting {
    let mut model = GradientBoosting::new(
        "lgbm",
        GbmParams {
            n_estimators: 15,
            seed,
            ..GbmParams::lightgbm()
        },
    );
    model.fit(x, y).unwrap();
    model
}

// ── 1. TreeSHAP Local Accuracy ───────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn tree_shap_adds_up_to_prediction((x, y) in arb_dataset(), seed in 0u64..1000) {
        let model = boosted(&x, &y, seed);
        let ensemble = model.as_tree_ensemble().unwrap();
        let sv = TreeShap::new(ensemble).shap_values(&x).unwrap();
        let preds = model.predict(&x).unwrap();
        for (i, p) in preds.iter().enumerate() {
            prop_assert!((sv.reconstruct(i) - p).abs() < 1e-6, "row {}: {} vs {}", i, sv.reconstruct(i), p);
        }
    }

    #[test]
    fn unused_features_get_zero_attribution((x, y) in arb_dataset()) {
        let model = boosted(&x, &y, 7);
        let ensemble = model.as_tree_ensemble().unwrap();
        let used: Vec<usize> = ensemble
            .trees
            .iter()
            .flat_map(|t| t.nodes().iter().filter_map(|n| n.split.as_ref().map(|s| s.feature)))
            .collect();
        let sv = TreeShap::new(ensemble).shap_values(&x).unwrap();
        for j in 0..3 {
            if !used.contains(&j) {
                prop_assert!(sv.values.column(j).iter().all(|v| *v == 0.0));
            }
        }
    }
}

// ── 2. Permutation Local Accuracy ────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn permutation_shap_adds_up_for_linear_models(
        coef in prop::collection::vec(-3.0..3.0_f64, 2),
        seed in 0u64..1000,
    ) {
        let a: Vec<f64> = (0..30).map(|i| f64::from(i % 7)).collect();
        let b: Vec<f64> = (0..30).map(|i| f64::from((i * 4) % 9)).collect();
        let y: Vec<f64> = a.iter().zip(&b).map(|(a, b)| coef[0] * a + coef[1] * b + 0.5).collect();
        let x = Matrix::from_columns(vec!["a".into(), "b".into()], &[a, b]).unwrap();
        let mut model = OlsRegressor::new();
        model.fit(&x, &y).unwrap();

        let shap = PermutationShap::new(&model, x.take_rows(&[0, 5, 11]), 3, RngHierarchy::new(seed)).unwrap();
        let sv = shap.shap_values(&x).unwrap();
        let preds = model.predict(&x).unwrap();
        for (i, p) in preds.iter().enumerate() {
            prop_assert!((sv.reconstruct(i) - p).abs() < 1e-8);
        }
    }
}

// ── 3. Dispatch ──────────────────────────────────────────────────────

#[test]
fn compute_shap_keeps_rows_with_missing_inputs_for_trees() {
    let rows: Vec<Vec<f64>> = (0..60)
        .map(|i| {
            let a = if i % 10 == 0 { f64::NAN } else { f64::from(i % 8) };
            vec![a, f64::from(i % 5), f64::from(i % 3)]
        })
        .collect();
    let y: Vec<f64> = rows
        .iter()
        .map(|r| (if r[0].is_nan() { 4.0 } else { r[0] }) + r[1])
        .collect();
    let x = Matrix::from_rows(vec!["a".into(), "b".into(), "noise".into()], rows).unwrap();
    let model = boosted(&x, &y, 1);

    let sv = compute_shap(&model, &x, &ShapConfig::default()).unwrap();
    assert_eq!(sv.method, ShapMethod::Tree);
    assert_eq!(sv.values.n_rows(), 60);
    let top = sv.global_importance(None);
    assert_eq!(top[0].0, "a");
    assert_eq!(top[2].0, "noise");
}
