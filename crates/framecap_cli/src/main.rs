//! framecap CLI
//!
//! Record the software demo frame, then inspect, export or replay capture
//! files against the software device.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use framecap_chunk::CaptureFile;
use framecap_replay::{ActionDescription, ReplayEngine, ReplayOptions};
use framecap_soft::{DemoSchedule, SoftDevice, SoftReplayer, dispatch_table, record_demo};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "framecap")]
#[command(about = "framecap - GPU frame capture and replay", long_about = None)]
struct Cli {
    /// Replay options as JSON
    #[arg(long, global = true)]
    options: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the demo frame on the software device
    RecordDemo {
        /// Output capture file
        #[arg(short, long)]
        output: PathBuf,
        /// Seed for the recording thread schedule
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print a capture's header, counters and scopes
    Inspect {
        /// Capture file
        file: PathBuf,
    },
    /// Decode every chunk to JSON
    Export {
        /// Capture file
        file: PathBuf,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay an event range and print the presented image
    Replay {
        /// Capture file
        file: PathBuf,
        /// First event
        #[arg(long, default_value_t = 1)]
        start: u32,
        /// Last event, defaults to the end of the frame
        #[arg(long)]
        end: Option<u32>,
        /// Execute only the range instead of the frame up to `end`
        #[arg(long)]
        partial: bool,
    },
    /// Print the action tree
    Actions {
        /// Capture file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("framecap=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let options = load_options(cli.options.as_deref())?;
    match cli.command {
        Commands::RecordDemo { output, seed } => {
            let schedule = seed.map(DemoSchedule::from_seed).unwrap_or_default();
            let demo = record_demo(schedule)?;
            demo.file.write_to(&output)?;
            writeln!(out, "Recorded demo frame to {}", output.display())?;
            writeln!(out, "Pixels: {}", hex_pixels(&demo.pixels))?;
        }
        Commands::Inspect { file } => inspect(&file, options, out)?,
        Commands::Export { file, output } => {
            let capture = open(&file)?;
            let mut engine = engine(options)?;
            let chunks = engine.export_structured(capture.frame_capture)?;
            let json = serde_json::to_string_pretty(&chunks)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .wrap_err_with(|| format!("writing {}", path.display()))?;
                    writeln!(out, "Exported {} chunks to {}", chunks.len(), path.display())?;
                }
                None => writeln!(out, "{json}")?,
            }
        }
        Commands::Replay {
            file,
            start,
            end,
            partial,
        } => {
            let mut engine = loaded(&file, options)?;
            let end = end.unwrap_or_else(|| engine.last_event());
            engine.replay_log(start, end, partial)?;
            writeln!(out, "Replayed events {start}..={end}{}", if partial { " (partial)" } else { "" })?;
            match presented_pixels(&engine) {
                Some(pixels) => writeln!(out, "Pixels: {}", hex_pixels(&pixels))?,
                None => writeln!(out, "Nothing presented")?,
            }
        }
        Commands::Actions { file } => {
            let engine = loaded(&file, options)?;
            for action in engine.actions() {
                print_action(action, 0, out)?;
            }
        }
    }
    Ok(())
}

fn load_options(path: Option<&Path>) -> Result<ReplayOptions> {
    let Some(path) = path else {
        return Ok(ReplayOptions::default());
    };
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    let options = serde_json::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))?;
    tracing::debug!(path = %path.display(), ?options, "replay options loaded");
    Ok(options)
}

fn open(path: &Path) -> Result<CaptureFile> {
    CaptureFile::open(path).wrap_err_with(|| format!("opening {}", path.display()))
}

fn engine(options: ReplayOptions) -> Result<ReplayEngine<SoftReplayer>> {
    Ok(ReplayEngine::new(
        SoftReplayer::new(SoftDevice::new()),
        dispatch_table()?,
        options,
    ))
}

fn loaded(path: &Path, options: ReplayOptions) -> Result<ReplayEngine<SoftReplayer>> {
    let capture = open(path)?;
    let mut engine = engine(options)?;
    engine.load(&capture)?;
    Ok(engine)
}

fn inspect(path: &Path, options: ReplayOptions, out: &mut impl Write) -> Result<()> {
    let capture = open(path)?;
    writeln!(out, "Driver: {}", capture.driver_name)?;
    writeln!(out, "Machine: {}", capture.machine_ident)?;
    writeln!(out, "Stream: {} bytes", capture.frame_capture.len())?;
    if let Some(notes) = &capture.notes {
        writeln!(out, "Notes: {notes}")?;
    }

    let mut engine = engine(options)?;
    engine.load(&capture)?;
    let frame = engine
        .frame()
        .ok_or_else(|| eyre!("capture has no frame"))?;
    let stats = frame.info.stats;
    writeln!(out, "Frame: {}", frame.info.frame_number)?;
    writeln!(
        out,
        "Chunks: {} root, {} in {} scopes, {} creation, {} initial contents",
        stats.root_chunks, stats.scope_chunks, stats.scopes, stats.creation_chunks, stats.initial_contents
    )?;
    writeln!(out, "Events: {}", engine.last_event())?;

    for info in engine.timeline().scopes() {
        writeln!(
            out,
            "Scope {}: events {}..={}{}",
            info.scope,
            info.start_event_id,
            info.end_event_id,
            if info.interleaved { " (interleaved)" } else { "" }
        )?;
    }
    for (name, kind) in engine.stats().iter() {
        writeln!(out, "  {name:<32} {:>6} chunks {:>8} bytes", kind.count, kind.bytes)?;
    }
    Ok(())
}

fn presented_pixels(engine: &ReplayEngine<SoftReplayer>) -> Option<Vec<u32>> {
    let presented = engine.presented();
    if presented.is_null() {
        return None;
    }
    let native = engine.resources().live_native(presented)?;
    engine.backend().device().read_texture(native)
}

fn hex_pixels(pixels: &[u32]) -> String {
    pixels
        .iter()
        .map(|pixel| format!("{pixel:08x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_action(action: &ActionDescription, depth: usize, out: &mut impl Write) -> Result<()> {
    writeln!(
        out,
        "{:indent$}{:>4}  {}  {:?}",
        "",
        action.event_id,
        action.name,
        action.flags,
        indent = depth * 2
    )?;
    for child in &action.children {
        print_action(child, depth + 1, out)?;
    }
    Ok(())
}
