//! histpage CLI - Command-line interface for histpage.
//!
//! Inspects raw count files through a paged workspace and answers
//! spectrum-detector lookups.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};
use histpage_core::{DetectorId, DetectorIndex, SpectraDetectorMap, SpectrumNumber, NO_SPECTRUM};
use histpage_io::{ManagedWorkspace, MemoryConfig, PagingPlan, RawLayout};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Paging error: {0}")]
    HistpageIo(#[from] histpage_io::Error),

    #[error("Map error: {0}")]
    Core(#[from] histpage_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Paged histogram workspace inspector.
#[derive(Parser)]
#[command(name = "histpage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options describing a raw count file and how to page it.
#[derive(clap::Args)]
struct RawArgs {
    /// Raw file of little-endian u32 counts, spectrum-major
    input: PathBuf,

    /// Number of spectra in the file
    #[arg(long)]
    spectra: usize,

    /// Time channels per spectrum
    #[arg(long)]
    channels: usize,

    /// Bytes to skip before the first count
    #[arg(long, default_value = "0")]
    header_bytes: usize,

    /// Memory budget in MiB (default: half of available memory)
    #[arg(long)]
    budget_mb: Option<usize>,

    /// Spectra per block
    #[arg(long)]
    block_size: Option<usize>,

    /// Blocks kept in memory at once
    #[arg(long)]
    resident: Option<usize>,

    /// Directory for scratch files
    #[arg(long)]
    temp_dir: Option<PathBuf>,
}

impl RawArgs {
    fn layout(&self) -> RawLayout {
        RawLayout::new(self.spectra, self.channels).with_header_bytes(self.header_bytes)
    }

    fn memory_config(&self) -> Result<MemoryConfig> {
        let mut config = MemoryConfig::default();
        if let Some(mb) = self.budget_mb {
            config = config.with_memory_budget_bytes(mb * 1024 * 1024);
        }
        if let Some(size) = self.block_size {
            config = config.try_with_block_size(size)?;
        }
        if let Some(blocks) = self.resident {
            config = config.try_with_max_resident_blocks(blocks)?;
        }
        if let Some(dir) = &self.temp_dir {
            config = config.with_temp_dir(dir);
        }
        Ok(config)
    }

    fn open(&self) -> Result<ManagedWorkspace> {
        let config = self.memory_config()?;
        Ok(ManagedWorkspace::open_raw(
            &self.input,
            self.layout(),
            &config,
        )?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the shape and paging plan of a raw count file
    Info {
        #[command(flatten)]
        raw: RawArgs,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the X, Y and E values of spectra by workspace index
    Dump {
        #[command(flatten)]
        raw: RawArgs,

        /// Workspace indices to print
        #[arg(short, long = "spectrum", required = true)]
        spectra: Vec<usize>,
    },

    /// Load a two-column "spectrum detector" table and answer lookups
    Map {
        /// Whitespace-separated pairs file; '#' starts a comment
        input: PathBuf,

        /// Detectors to look up
        #[arg(short, long = "detector")]
        detectors: Vec<DetectorId>,

        /// Detector ID range to look up, as START..END (end exclusive)
        #[arg(long, value_parser = parse_range)]
        range: Option<(DetectorId, DetectorId)>,

        /// Spectra to look up
        #[arg(short, long = "spectrum")]
        spectra: Vec<SpectrumNumber>,
    },
}

#[derive(Serialize)]
struct InfoReport {
    file: PathBuf,
    spectra: usize,
    channels: usize,
    x_values: usize,
    size: usize,
    plan: PagingPlan,
    paged: bool,
    resident_bytes: usize,
    total_bytes: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { raw, json } => {
            let ws = raw.open()?;
            let plan = *ws.paging_plan();
            let report = InfoReport {
                file: raw.input.clone(),
                spectra: ws.get_number_histograms(),
                channels: ws.blocksize(),
                x_values: ws.x_len(),
                size: ws.size(),
                plan,
                paged: plan.is_paged(),
                resident_bytes: plan.resident_bytes(),
                total_bytes: plan.total_bytes(),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("File: {}", report.file.display());
                println!("Spectra: {}", report.spectra);
                println!("Channels: {} ({} boundaries)", report.channels, report.x_values);
                println!(
                    "Blocks: {} x {} spectra, {} resident",
                    plan.n_blocks, plan.block_size, plan.max_resident_blocks
                );
                println!(
                    "Memory: {:.2} MB resident of {:.2} MB total{}",
                    report.resident_bytes as f64 / 1_000_000.0,
                    report.total_bytes as f64 / 1_000_000.0,
                    if report.paged { " (paged)" } else { "" }
                );
            }
        }

        Commands::Dump { raw, spectra } => {
            let mut ws = raw.open()?;
            for index in spectra {
                println!("spectrum {} (index {})", ws.spectrum_number(index)?, index);
                println!("  X: {:?}", ws.read_x(index)?);
                println!("  Y: {:?}", ws.read_y(index)?);
                println!("  E: {:?}", ws.read_e(index)?);
            }
            let stats = ws.cache_stats();
            log::info!(
                "{} hits, {} misses, {} evictions",
                stats.hits,
                stats.misses,
                stats.evictions
            );
        }

        Commands::Map {
            input,
            detectors,
            range,
            spectra,
        } => {
            let map = read_pairs(&input)?;
            println!("Spectra: {}", map.n_spectra());
            println!("Pairs: {}", map.n_elements());

            for spectrum in spectra {
                println!("spectrum {}: {:?}", spectrum, map.detectors(spectrum));
            }
            let mut query: DetectorIndex = detectors.into_iter().collect();
            if let Some((start, end)) = range {
                query.extend(DetectorIndex::from_range(start, end));
            }
            if !query.is_empty() {
                let found = map.get_spectra(&query);
                for (detector, spectrum) in query.iter().zip(found) {
                    if spectrum == NO_SPECTRUM {
                        println!("detector {}: unmapped", detector);
                    } else {
                        println!("detector {}: spectrum {}", detector, spectrum);
                    }
                }
            }
        }
    }

    Ok(())
}

fn parse_range(text: &str) -> std::result::Result<(DetectorId, DetectorId), String> {
    let (start, end) = text
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got {text:?}"))?;
    let start = start.trim().parse().map_err(|e| format!("bad start: {e}"))?;
    let end = end.trim().parse().map_err(|e| format!("bad end: {e}"))?;
    Ok((start, end))
}

fn read_pairs(path: &Path) -> Result<SpectraDetectorMap> {
    let text = std::fs::read_to_string(path)?;
    let mut spectra = Vec::new();
    let mut detectors = Vec::new();

    for (n, line) in text.lines().enumerate() {
        let content = line.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        let parse_error = |message: String| CliError::Parse {
            path: path.to_path_buf(),
            line: n + 1,
            message,
        };
        let fields: Vec<&str> = content.split_whitespace().collect();
        let [spectrum, detector] = fields.as_slice() else {
            return Err(parse_error(format!(
                "expected 2 columns, found {}",
                fields.len()
            )));
        };
        spectra.push(
            spectrum
                .parse::<SpectrumNumber>()
                .map_err(|e| parse_error(format!("bad spectrum {spectrum:?}: {e}")))?,
        );
        detectors.push(
            detector
                .parse::<DetectorId>()
                .map_err(|e| parse_error(format!("bad detector {detector:?}: {e}")))?,
        );
    }

    let mut map = SpectraDetectorMap::new();
    map.populate(&spectra, &detectors)?;
    log::debug!("loaded {} pairs from {}", map.n_elements(), path.display());
    Ok(map)
}
