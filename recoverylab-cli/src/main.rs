//! RecoveryLab CLI: data preparation, experiments and scenarios.
//!
//! Commands:
//! - `normalize`: turn a raw export (OWID cases, OxCGRT stringency, Eurostat wide) into a long monthly table
//! - `merge`: join the raw tables of a directory into one panel
//! - `clean`: cleaning only, for inspecting the study-period panel
//! - `features`: full preparation of a merged panel (features on the whole history, then cleaning)
//! - `summary`: completeness by year and a correlation matrix
//! - `run`: train and score the models of a TOML experiment
//! - `scenario`: symmetric shock on one model with per-country elasticities
//! - `cache status`: list feature snapshots

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use recoverylab_core::data::{
    aggregate_daily_cases, aggregate_daily_stringency, clean_panel, clean_with_features, completeness_by_year,
    correlation_matrix, eurostat_wide_to_long, load_raw_dir, merge_sources, read_panel, write_panel, CleanConfig,
    DimensionFilter, MergePlan, SnapshotCache,
};
use recoverylab_core::domain::Month;
use recoverylab_core::features::FeatureSpec;
use recoverylab_runner::export::{export_elasticity_csv, generate_scenario_report};
use recoverylab_runner::{
    run_experiment, save_artifacts, symmetric_scenario, ExperimentConfig, ExperimentResult, ShockType, SplitSet,
};

#[derive(Parser)]
#[command(name = "recoverylab", about = "RecoveryLab: hotel demand recovery modelling on a country-month panel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RawKind {
    /// OWID daily COVID cases.
    Covid,
    /// OxCGRT daily stringency index.
    Stringency,
    /// Eurostat wide export (one column per period).
    Eurostat,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a raw export into a long monthly table.
    Normalize {
        #[arg(value_enum)]
        kind: RawKind,

        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Value column name for Eurostat exports.
        #[arg(long, default_value = "nights_spent")]
        value_name: String,

        /// Eurostat dimension filter, `column=a,b` (repeatable).
        #[arg(long = "filter")]
        filters: Vec<String>,
    },
    /// Merge the raw tables of a directory into one panel.
    Merge {
        #[arg(long, default_value = "data/raw")]
        raw_dir: PathBuf,

        #[arg(long, default_value = "data/interim/hotel.csv")]
        output: PathBuf,

        /// First month kept (YYYY-MM).
        #[arg(long)]
        start: Option<String>,

        /// Last month kept (YYYY-MM).
        #[arg(long)]
        end: Option<String>,
    },
    /// Keep the study period, drop rows without target, interpolate and fill.
    Clean {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long)]
        from_year: Option<i32>,

        #[arg(long)]
        to_year: Option<i32>,
    },
    /// Add log, lag and calendar features to a merged panel, then clean it.
    Features {
        /// Merged panel; lags read months before the study period.
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long)]
        from_year: Option<i32>,

        #[arg(long)]
        to_year: Option<i32>,

        /// Also store the result as a Parquet snapshot here.
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },
    /// Completeness by year and correlations of a panel.
    Summary {
        #[arg(long)]
        input: PathBuf,

        /// Columns to summarize. Defaults to every column.
        #[arg(long, num_args = 1..)]
        columns: Vec<String>,
    },
    /// Train and score the models of an experiment.
    Run {
        #[arg(long)]
        config: PathBuf,

        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Shock one input family up and down and report elasticities.
    Scenario {
        #[arg(long)]
        config: PathBuf,

        /// gdp, turnover or policy.
        #[arg(long)]
        shock: ShockType,

        /// Proportional shock size, e.g. 0.05.
        #[arg(long, default_value_t = 0.05)]
        value: f64,

        /// Model to shock. Defaults to the best validation model.
        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Snapshot cache commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List snapshots with their row count and month range.
    Status {
        #[arg(long, default_value = "data/snapshots")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Normalize {
            kind,
            input,
            output,
            value_name,
            filters,
        } => run_normalize(kind, &input, &output, &value_name, &filters),
        Commands::Merge {
            raw_dir,
            output,
            start,
            end,
        } => run_merge(&raw_dir, &output, start.as_deref(), end.as_deref()),
        Commands::Clean {
            input,
            output,
            from_year,
            to_year,
        } => run_clean(&input, &output, clean_config(from_year, to_year)),
        Commands::Features {
            input,
            output,
            from_year,
            to_year,
            snapshot_dir,
        } => run_features(&input, &output, clean_config(from_year, to_year), snapshot_dir.as_deref()),
        Commands::Summary { input, columns } => run_summary(&input, &columns),
        Commands::Run { config, output_dir } => run_experiment_cmd(&config, &output_dir),
        Commands::Scenario {
            config,
            shock,
            value,
            model,
            output_dir,
        } => run_scenario(&config, shock, value, model.as_deref(), &output_dir),
        Commands::Cache { action } => match action {
            CacheAction::Status { dir } => run_cache_status(&dir),
        },
    }
}

fn run_normalize(kind: RawKind, input: &Path, output: &Path, value_name: &str, filters: &[String]) -> Result<()> {
    let file = File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let table = match kind {
        RawKind::Covid => aggregate_daily_cases(file)?,
        RawKind::Stringency => aggregate_daily_stringency(file)?,
        RawKind::Eurostat => {
            let filters = filters.iter().map(|f| parse_filter(f)).collect::<Result<Vec<_>>>()?;
            eurostat_wide_to_long(file, value_name, &filters)?
        }
    };
    table.write_path(output)?;
    println!(
        "Wrote {} rows ({} countries) to {}",
        table.records.len(),
        table.region_count(),
        output.display()
    );
    Ok(())
}

fn parse_filter(raw: &str) -> Result<DimensionFilter> {
    let Some((column, values)) = raw.split_once('=') else {
        bail!("filter '{raw}' must look like column=a,b");
    };
    let allowed: Vec<&str> = values.split(',').map(str::trim).filter(|v| !v.is_empty()).collect();
    if allowed.is_empty() {
        bail!("filter '{raw}' lists no values");
    }
    Ok(DimensionFilter::new(column.trim(), &allowed))
}

fn run_merge(raw_dir: &Path, output: &Path, start: Option<&str>, end: Option<&str>) -> Result<()> {
    let mut plan = MergePlan::default();
    if start.is_some() || end.is_some() {
        let (default_start, default_end) = plan.window.unzip();
        let parse = |s: Option<&str>, fallback: Option<Month>| -> Result<Month> {
            match s {
                Some(s) => Ok(Month::parse(s)?),
                None => fallback.context("merge window needs both ends"),
            }
        };
        plan.window = Some((parse(start, default_start)?, parse(end, default_end)?));
    }
    let (base, joins) = load_raw_dir(raw_dir)?;
    let (panel, report) = merge_sources(base, &joins, &plan)?;
    write_panel(&panel, output)?;
    println!(
        "Merged {} sources: {} rows, {} countries -> {}",
        report.joins.len() + 1,
        report.rows,
        report.regions,
        output.display()
    );
    for join in &report.joins {
        println!("  {}", serde_json::to_string(join)?);
    }
    Ok(())
}

fn clean_config(from_year: Option<i32>, to_year: Option<i32>) -> CleanConfig {
    let mut config = CleanConfig::default();
    config.years = (from_year.unwrap_or(config.years.0), to_year.unwrap_or(config.years.1));
    config
}

fn run_clean(input: &Path, output: &Path, config: CleanConfig) -> Result<()> {
    let panel = read_panel(input)?;
    let (clean, report) = clean_panel(&panel, &config)?;
    write_panel(&clean, output)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_features(input: &Path, output: &Path, config: CleanConfig, snapshot_dir: Option<&Path>) -> Result<()> {
    let panel = read_panel(input)?;
    let (features, derived, report) = clean_with_features(&panel, &config, &FeatureSpec::default())?;
    write_panel(&features, output)?;
    println!("Added {} columns -> {}", derived.len(), output.display());
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(dir) = snapshot_dir {
        let name = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "features".into());
        let meta = SnapshotCache::new(dir).write(&name, &features)?;
        println!("Snapshot '{}' written ({} rows, hash {})", meta.name, meta.rows, meta.content_hash.get(..12).unwrap_or(&meta.content_hash));
    }
    Ok(())
}

fn run_summary(input: &Path, columns: &[String]) -> Result<()> {
    let panel = read_panel(input)?;
    let names: Vec<&str> = if columns.is_empty() {
        panel.column_names().iter().map(String::as_str).collect()
    } else {
        columns.iter().map(String::as_str).collect()
    };

    let (present, years) = completeness_by_year(&panel, &names);
    println!("Rows: {}, countries: {}", panel.len(), panel.regions().len());
    if let Some((first, last)) = panel.month_range() {
        println!("Period: {first} to {last}");
    }
    println!();
    println!("Share of non-missing values by year:");
    print!("{:<6} {:>6}", "Year", "Rows");
    for c in &present {
        print!(" {:>14}", truncate(c, 14));
    }
    println!();
    for y in &years {
        print!("{:<6} {:>6}", y.year, y.rows);
        for s in &y.shares {
            print!(" {:>14.2}", s);
        }
        println!();
    }

    let corr = correlation_matrix(&panel, &names, None);
    println!();
    println!("Correlations (complete pairs):");
    print!("{:<14}", "");
    for c in &corr.columns {
        print!(" {:>14}", truncate(c, 14));
    }
    println!();
    for (c, row) in corr.columns.iter().zip(&corr.values) {
        print!("{:<14}", truncate(c, 14));
        for v in row {
            if v.is_finite() {
                print!(" {:>14.2}", v);
            } else {
                print!(" {:>14}", "-");
            }
        }
        println!();
    }
    Ok(())
}

fn truncate(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn run_experiment_cmd(config_path: &Path, output_dir: &Path) -> Result<()> {
    let config = ExperimentConfig::from_file(config_path)?;
    let outcome = run_experiment(&config).context("experiment failed")?;
    print_summary(&outcome.result);
    let run_dir = save_artifacts(&outcome.result, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn run_scenario(
    config_path: &Path,
    shock: ShockType,
    value: f64,
    model: Option<&str>,
    output_dir: &Path,
) -> Result<()> {
    if shock == ShockType::None {
        bail!("choose a shock: gdp, turnover or policy");
    }
    if !value.is_finite() || value <= 0.0 || value >= 1.0 {
        bail!("shock value must lie in (0, 1), got {value}");
    }
    let mut config = ExperimentConfig::from_file(config_path)?;
    config.scenarios.clear();
    let outcome = run_experiment(&config).context("experiment failed")?;

    let name = match model {
        Some(m) => m.to_string(),
        None => outcome
            .result
            .best_model()
            .map(|e| e.model.clone())
            .context("no model was ranked")?,
    };
    let trained = outcome
        .models
        .iter()
        .find(|m| m.name() == name)
        .with_context(|| format!("model '{name}' was not fitted"))?;

    let split = recoverylab_runner::temporal_split(&outcome.panel, config.split.train_end, config.split.valid_end)?;
    let rows = split.holdout();
    info!(model = %name, %shock, value, rows = rows.len(), "symmetric scenario");
    let report = symmetric_scenario(&outcome.panel, &rows, trained, shock, value)
        .with_context(|| format!("model '{name}' could not score the shocked panel"))?;

    let md = generate_scenario_report(&report);
    print!("{md}");

    let dir = output_dir.join(format!("scenario_{}_{}", shock, name));
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    std::fs::write(dir.join("elasticity.csv"), export_elasticity_csv(&report.elasticity)?)?;
    std::fs::write(dir.join("scenario.json"), serde_json::to_string_pretty(&report)?)?;
    std::fs::write(dir.join("report.md"), md)?;
    println!("Scenario saved to: {}", dir.display());
    Ok(())
}

fn run_cache_status(dir: &Path) -> Result<()> {
    if !dir.exists() {
        println!("Snapshot directory does not exist: {}", dir.display());
        return Ok(());
    }
    let statuses = SnapshotCache::new(dir).status()?;
    if statuses.is_empty() {
        println!("No snapshots in {}", dir.display());
        return Ok(());
    }
    println!("Snapshots: {}", dir.display());
    println!("{:<24} {:>8} {:>9} {:<25} {:<12}", "Name", "Rows", "Countries", "Months", "Hash");
    println!("{}", "-".repeat(82));
    for s in &statuses {
        match &s.meta {
            Some(meta) => {
                let range = match (meta.first_month, meta.last_month) {
                    (Some(a), Some(b)) => format!("{a} to {b}"),
                    _ => "-".into(),
                };
                println!(
                    "{:<24} {:>8} {:>9} {:<25} {:<12}",
                    s.name,
                    meta.rows,
                    meta.regions,
                    range,
                    meta.content_hash.get(..12).unwrap_or(&meta.content_hash)
                );
            }
            None => println!("{:<24} (no metadata)", s.name),
        }
    }
    Ok(())
}

fn print_summary(result: &ExperimentResult) {
    println!();
    println!("=== Experiment: {} ===", result.name);
    println!("Run:            {}", result.run_id.get(..12).unwrap_or(&result.run_id));
    println!("Rows:           {} ({} countries)", result.data.rows, result.data.regions);
    println!(
        "Split:          train {} / valid {} / test {}",
        result.split.train_rows, result.split.valid_rows, result.split.test_rows
    );
    println!("Inputs:         {}", result.inputs.len());
    println!();
    println!("--- Leaderboard (validation) ---");
    println!("{:<5} {:<14} {:>10} {:>10} {:>9} {:>8}", "Rank", "Model", "RMSE", "MAE", "MAPE %", "R2");
    for e in &result.leaderboard {
        let m = &e.metrics;
        println!(
            "{:<5} {:<14} {:>10.4} {:>10.4} {:>9.2} {:>8.3}",
            e.rank, e.model, m.rmse, m.mae, m.mape, m.r2
        );
    }
    if result.split.test_rows > 0 {
        println!();
        println!("--- Test ---");
        for e in &result.leaderboard {
            if let Some(m) = result.metrics_for(&e.model, SplitSet::Test) {
                println!("{:<14} RMSE {:.4}  MAPE {:.2}%", e.model, m.rmse, m.mape);
            }
        }
    }
    for s in &result.shap {
        let top: Vec<&str> = s.importance.iter().take(5).map(|f| f.feature.as_str()).collect();
        println!();
        println!("SHAP {} top features: {}", s.model, top.join(", "));
    }
    for s in &result.skipped {
        match &s.region {
            Some(r) => println!("SKIPPED: {} / {}: {}", s.model, r, s.reason),
            None => println!("SKIPPED: {}: {}", s.model, s.reason),
        }
    }
    println!();
}
