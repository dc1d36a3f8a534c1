use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use salvage_core::{
    ExportEngine, ExportTask, ImageClusterSource, LimitedRetry, RecoveryManifest,
};

#[derive(Parser, Debug)]
#[command(name = "salvage", version, about = "Export recovered FATX directory trees to disk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export a recovery manifest against a volume image
    Export {
        /// Path to the raw volume image
        #[arg(long)]
        image: PathBuf,
        /// Recovery manifest produced by the volume parser
        #[arg(long)]
        manifest: PathBuf,
        /// Destination directory
        #[arg(long)]
        out: PathBuf,
        /// Automatic retries per failing write before giving up on the entry
        #[arg(long, default_value = "2")]
        retries: u32,
        /// Skip orphaned cluster groups
        #[arg(long)]
        skip_orphans: bool,
        /// Write the machine-readable summary to this path
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Print entry counts for a manifest without touching disk
    Inspect {
        #[arg(long)]
        manifest: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Export {
            image,
            manifest,
            out,
            retries,
            skip_orphans,
            summary,
        } => {
            let mut manifest = RecoveryManifest::from_path(&manifest)?;
            if skip_orphans {
                manifest.orphans.clear();
            }

            let source = ImageClusterSource::open(
                &image,
                manifest.volume.data_offset,
                manifest.volume.cluster_size,
            )?;
            let mut engine = ExportEngine::new(source);
            engine.set_decision_provider(LimitedRetry(retries));

            let (tx, rx) = mpsc::channel();
            engine.set_progress_sink(tx);

            let bar = ProgressBar::new(100);
            bar.set_style(ProgressStyle::with_template("{bar:40} {percent:>3}% {msg}")?);

            let task = ExportTask::spawn(engine, manifest, out);
            for event in rx {
                bar.set_position(event.percent as u64);
                bar.set_message(event.message);
            }
            let result = task.join();
            bar.finish_and_clear();

            let report = result.context("export failed")?;
            println!(
                "{}/{} entries written, {} incomplete, {} abandoned ({} bytes)",
                report.written,
                report.total_entries,
                report.incomplete,
                report.abandoned,
                report.bytes_written
            );
            if let Some(path) = summary {
                std::fs::write(&path, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("writing summary to {}", path.display()))?;
            }
        }
        Commands::Inspect { manifest } => {
            let manifest = RecoveryManifest::from_path(&manifest)?;
            println!(
                "{} top-level roots, {} orphan groups, {} total entries",
                manifest.roots.len(),
                manifest.orphans.len(),
                manifest.entry_count()
            );
        }
    }
    Ok(())
}
