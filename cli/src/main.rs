//! `celllink` CLI: link simulated scenarios or recorded datasets.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use linker_core::{
    AdditionalLinks, FtfSettings, LinkAccuracy, Linker, LinkerConfig, LinkStore, SegmentSettings,
    TrackLinkEditor,
};
use serde_json::{json, Value};
use sim::{load_dataset, save_dataset, Cell, Dataset, Scenario, ScenarioKind};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "celllink", about = "Assignment-based cell linking CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a named scenario, link it and report accuracy against ground truth.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[command(flatten)]
        linking: LinkingArgs,
        /// Output accuracy to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the generated dataset
        #[arg(long)]
        save_dataset: Option<PathBuf>,
    },
    /// Link a dataset file and write the per-object links.
    Link {
        /// Path to dataset JSON file
        input: PathBuf,
        #[command(flatten)]
        linking: LinkingArgs,
        /// Output links to a JSON file (stdout otherwise)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct LinkingArgs {
    /// JSON settings object with the frame-to-frame and segment keys
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Remove crossing links after the frame-to-frame pass
    #[arg(long)]
    crossing_tolerance: Option<f64>,
    /// Worker threads per pool (0 = one per core)
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            linking,
            output,
            save_dataset: save_path,
        } => {
            run_scenario(scenario, seed, &linking, output.as_deref(), save_path.as_deref())?;
        }
        Commands::Link {
            input,
            linking,
            output,
        } => {
            run_link(&input, &linking, output.as_deref())?;
        }
    }

    Ok(())
}

/// Settings of both passes: defaults, or every key from the settings file.
fn load_settings(path: Option<&Path>) -> Result<(FtfSettings, SegmentSettings)> {
    let Some(path) = path else {
        return Ok((FtfSettings::default(), SegmentSettings::default()));
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing settings file {}", path.display()))?;
    Ok((FtfSettings::from_json(&value)?, SegmentSettings::from_json(&value)?))
}

struct LinkOutcome {
    linker: Linker<Cell>,
    store: LinkStore<u64>,
    additional: AdditionalLinks<u64>,
    removed_crossings: usize,
    elapsed_s: f64,
}

impl LinkOutcome {
    fn predicted(&self) -> Vec<(u64, u64)> {
        self.linker
            .graph()
            .object_edges()
            .into_iter()
            .map(|(a, b, _)| (a, b))
            .collect()
    }
}

fn link_dataset(dataset: &Dataset, args: &LinkingArgs) -> Result<LinkOutcome> {
    let (ftf, segments) = load_settings(args.settings.as_deref())?;
    let config = LinkerConfig {
        ftf_threads: args.threads,
        segment_threads: args.threads,
        ..LinkerConfig::default()
    };

    let start = Instant::now();
    let mut linker: Linker<Cell> = Linker::new(config)?;
    linker.add_objects(&dataset.frames);
    let ftf_report = linker.process_ftf(&ftf)?;
    let removed_crossings = args
        .crossing_tolerance
        .map_or(0, |tol| linker.remove_crossing_links(tol));
    let segment_report = linker.process_segments(&segments)?;

    let mut store = LinkStore::new();
    let additional = linker.set_track_links(&dataset.frames, &mut store);
    let elapsed_s = start.elapsed().as_secs_f64();

    tracing::info!(
        ftf_links = ftf_report.links_added,
        removed_crossings,
        gap_closing = segment_report.accepted.gap_closing,
        merging = segment_report.accepted.merging,
        splitting = segment_report.accepted.splitting,
        "linking done"
    );
    Ok(LinkOutcome {
        linker,
        store,
        additional,
        removed_crossings,
        elapsed_s,
    })
}

fn run_scenario(
    kind: ScenarioKind,
    seed: u64,
    linking: &LinkingArgs,
    output_path: Option<&Path>,
    dataset_path: Option<&Path>,
) -> Result<()> {
    let scenario = Scenario::build(kind, seed);
    println!(
        "Running scenario '{}' (seed={}, frames={})...",
        scenario.name, seed, scenario.n_frames
    );
    let dataset = scenario.run();

    if let Some(dpath) = dataset_path {
        save_dataset(&dataset, dpath)?;
        println!("Dataset saved to {}", dpath.display());
    }

    let outcome = link_dataset(&dataset, linking)?;
    let accuracy = LinkAccuracy::evaluate(&outcome.predicted(), &dataset.truth);
    println!(
        "Done: {} detections, {} links, {} additional, elapsed={:.2}s",
        dataset.n_detections(),
        outcome.linker.graph().edge_count(),
        outcome.additional.len(),
        outcome.elapsed_s,
    );
    println!(
        "Accuracy: precision={:.3} recall={:.3} f1={:.3}",
        accuracy.precision(),
        accuracy.recall(),
        accuracy.f1(),
    );

    if let Some(opath) = output_path {
        let json = json!({
            "scenario": scenario.name,
            "seed": seed,
            "elapsed_s": outcome.elapsed_s,
            "detections": dataset.n_detections(),
            "links": outcome.linker.graph().edge_count(),
            "removed_crossings": outcome.removed_crossings,
            "additional_links": outcome.additional.len(),
            "accuracy": accuracy,
            "precision": accuracy.precision(),
            "recall": accuracy.recall(),
            "f1": accuracy.f1(),
        });
        std::fs::write(opath, serde_json::to_string_pretty(&json)?)?;
        println!("Accuracy saved to {}", opath.display());
    }

    Ok(())
}

fn run_link(input: &Path, linking: &LinkingArgs, output_path: Option<&Path>) -> Result<()> {
    let dataset =
        load_dataset(input).with_context(|| format!("loading dataset {}", input.display()))?;
    eprintln!(
        "Linking '{}' ({} frames, {} detections)...",
        dataset.name,
        dataset.frames.len(),
        dataset.n_detections()
    );

    let outcome = link_dataset(&dataset, linking)?;
    let objects: Vec<Value> = dataset
        .frames
        .values()
        .flatten()
        .map(|cell| {
            json!({
                "id": cell.id,
                "frame": cell.frame,
                "previous": outcome.store.previous(&cell.id),
                "next": outcome.store.next(&cell.id),
                "trackhead": outcome.store.trackhead(&cell.id),
            })
        })
        .collect();

    let mut json = json!({
        "dataset": dataset.name,
        "elapsed_s": outcome.elapsed_s,
        "objects": objects,
        "additional_links": outcome.additional,
    });
    if !dataset.truth.is_empty() {
        let accuracy = LinkAccuracy::evaluate(&outcome.predicted(), &dataset.truth);
        eprintln!(
            "Accuracy: precision={:.3} recall={:.3} f1={:.3}",
            accuracy.precision(),
            accuracy.recall(),
            accuracy.f1(),
        );
        json["accuracy"] = serde_json::to_value(&accuracy)?;
    }

    let text = serde_json::to_string_pretty(&json)?;
    match output_path {
        Some(opath) => {
            std::fs::write(opath, text)?;
            eprintln!("Links saved to {}", opath.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}
