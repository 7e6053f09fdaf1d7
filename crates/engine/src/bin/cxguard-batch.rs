//! cxguard-batch: offline driver for training, bulk scoring and evaluation.
//!
//! Records are read from JSON-lines files (one raw interaction per line).
//! Paths not given on the command line come from the environment config
//! (`CXGUARD_*`, optionally profiled).

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use cxguard_core::{Config, RawRecord};
use cxguard_engine::{evaluate, train_bundle, ModelSelector, ScoringEngine, TrainingConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Train, score and evaluate interaction anomaly models from JSON-lines files.
#[derive(Parser, Debug)]
#[command(name = "cxguard-batch", version, about)]
struct Cli {
    /// Config profile; `PROD` reads `PROD_<KEY>` before `<KEY>`.
    #[arg(long, global = true, env = "CXGUARD_PROFILE", default_value = "")]
    profile: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the pipeline and models, then write an artifact bundle.
    Train {
        /// Training configuration (YAML).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Training records (JSON lines).
        #[arg(long)]
        input: PathBuf,
        /// Destination bundle file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Score records with an existing bundle.
    Score {
        #[arg(long)]
        bundle: Option<PathBuf>,
        #[arg(long)]
        input: PathBuf,
        /// Result file (JSON lines); defaults to a timestamped file in the output dir.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Model id, or `all` for the ensemble.
        #[arg(long)]
        model: Option<String>,
    },
    /// Compare models on a record set and print a JSON report.
    Evaluate {
        #[arg(long)]
        bundle: Option<PathBuf>,
        #[arg(long)]
        input: PathBuf,
    },
    /// Print metadata of every model in a bundle.
    Models {
        #[arg(long)]
        bundle: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    cxguard_core::config::load_dotenv();
    let cli = Cli::parse();
    let config = Config::for_profile(&cli.profile);
    config.log_summary();

    match cli.command {
        Command::Train { config: training, input, output } => {
            let training = training.unwrap_or_else(|| config.training.config_path.clone());
            let output = output.unwrap_or_else(|| config.artifacts.bundle_path.clone());
            run_train(&training, &input, &output)
        }
        Command::Score { bundle, input, output, model } => {
            let bundle = bundle.unwrap_or_else(|| config.artifacts.bundle_path.clone());
            let output = output.unwrap_or_else(|| {
                config
                    .training
                    .output_dir
                    .join(format!("scores-{}.jsonl", Utc::now().format("%Y%m%dT%H%M%S")))
            });
            let model = model.unwrap_or_else(|| config.scoring.default_model.clone());
            run_score(&bundle, &input, &output, &model)
        }
        Command::Evaluate { bundle, input } => {
            let bundle = bundle.unwrap_or_else(|| config.artifacts.bundle_path.clone());
            run_evaluate(&bundle, &input)
        }
        Command::Models { bundle } => {
            let bundle = bundle.unwrap_or_else(|| config.artifacts.bundle_path.clone());
            let engine = open_engine(&bundle)?;
            let models = engine.list_models()?;
            println!("{}", serde_json::to_string_pretty(&models)?);
            Ok(())
        }
    }
}

// ── Subcommands ─────────────────────────────────────────────────────

fn run_train(config_path: &Path, input: &Path, output: &Path) -> Result<()> {
    let training = TrainingConfig::load(config_path)
        .with_context(|| format!("failed to load training config {}", config_path.display()))?;
    let (records, unreadable) = read_jsonl(input)?;
    if unreadable > 0 {
        warn!(unreadable, "skipped unreadable training lines");
    }

    let bundle = train_bundle(&records, &training).context("training failed")?;
    bundle
        .save(output)
        .with_context(|| format!("failed to write bundle {}", output.display()))?;

    let thresholds: serde_json::Map<String, serde_json::Value> = bundle
        .models
        .iter()
        .map(|(id, a)| (id.clone(), json!(a.metadata.threshold)))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "bundle_id": bundle.bundle_id,
            "output": output,
            "records": bundle.training.records,
            "rejected": bundle.training.rejected + unreadable,
            "features": bundle.pipeline.width(),
            "thresholds": thresholds,
            "ensemble_threshold": bundle.ensemble_threshold,
        }))?
    );
    Ok(())
}

fn run_score(bundle: &Path, input: &Path, output: &Path, model: &str) -> Result<()> {
    let engine = open_engine(bundle)?;
    let selector = ModelSelector::parse(model)?;
    let (records, unreadable) = read_jsonl(input)?;

    let batch = engine.score_batch(&records, &selector)?;
    for rejected in &batch.rejected {
        warn!(
            index = rejected.index,
            interaction_id = rejected.interaction_id.as_deref().unwrap_or("-"),
            reason = %rejected.reason,
            "record rejected"
        );
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }
    let file = File::create(output).with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    for result in &batch.results {
        serde_json::to_writer(&mut writer, result)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!(output = %output.display(), results = batch.results.len(), "wrote scores");
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "output": output,
            "total_records": batch.total_records + unreadable,
            "scored": batch.results.len(),
            "rejected": batch.rejected.len() + unreadable,
            "anomalies_detected": batch.anomalies_detected,
            "processing_time_ms": batch.elapsed_ms,
            "generation": batch.generation,
        }))?
    );
    Ok(())
}

fn run_evaluate(bundle: &Path, input: &Path) -> Result<()> {
    let engine = open_engine(bundle)?;
    let (records, unreadable) = read_jsonl(input)?;
    if unreadable > 0 {
        warn!(unreadable, "skipped unreadable evaluation lines");
    }
    let report = evaluate(&engine, &records).context("evaluation failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────

fn open_engine(bundle: &Path) -> Result<ScoringEngine> {
    ScoringEngine::open(bundle).with_context(|| format!("failed to open bundle {}", bundle.display()))
}

/// Read raw records from a JSON-lines file. Blank lines are skipped; lines
/// that are not valid JSON objects are logged and counted.
fn read_jsonl(path: &Path) -> Result<(Vec<RawRecord>, usize)> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    let mut unreadable = 0usize;

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                unreadable += 1;
                warn!(line = idx + 1, error = %e, "unparsable record line");
            }
        }
    }

    info!(path = %path.display(), records = records.len(), unreadable, "read records");
    Ok((records, unreadable))
}
