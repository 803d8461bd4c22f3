//! Labelbridge: convert dataset annotations between on-disk formats.
//!
//! Labelbridge reads a dataset directory into a unified annotation model,
//! and writes it back out in any registered format. Segmentation formats
//! that pack classes, instances and part hierarchies into the channels of
//! an RGB raster are handled by a shared mask codec, so a new format only
//! has to describe its file layout.
//!
//! # Modules
//!
//! - [`ir`]: the annotation model (items, annotations, masks, labels)
//! - [`codec`]: the channel-packed instance and part mask codec
//! - [`format`]: format plugins, the registry and format detection
//! - [`conversion`]: the export driver and conversion reports
//! - [`dataset`]: the dataset aggregate with import, export, merge,
//!   filter, split and label remapping
//! - [`validation`]: dataset validation and error reporting
//! - [`stats`]: dataset statistics
//! - [`error`]: error types for labelbridge operations

pub mod codec;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod format;
pub mod ir;
pub mod stats;
pub mod validation;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use codec::{PartAssignment, TieBreak};
use dataset::Dataset;
use format::{ExportOptions, FormatRegistry, ImportOptions};

pub use error::LabelbridgeError;

/// The labelbridge CLI application.
#[derive(Parser)]
#[command(name = "labelbridge")]
#[command(version, author, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log output (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// List the registered formats and the annotation types they can write.
    ListFormats,
    /// Detect the format of a dataset directory.
    Detect(DetectArgs),
    /// Convert a dataset from one format to another.
    Convert(ConvertArgs),
    /// Validate a dataset for errors and warnings.
    Validate(ValidateArgs),
    /// Show dataset statistics.
    Stats(StatsArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum TieBreakArg {
    #[default]
    Lowest,
    Highest,
}

impl From<TieBreakArg> for TieBreak {
    fn from(arg: TieBreakArg) -> Self {
        match arg {
            TieBreakArg::Lowest => TieBreak::LowestInstance,
            TieBreakArg::Highest => TieBreak::HighestInstance,
        }
    }
}

/// Options shared by every subcommand that reads a dataset.
#[derive(clap::Args)]
struct InputArgs {
    /// Dataset root directory.
    input: PathBuf,

    /// Input format; detected from the directory layout when omitted.
    #[arg(long = "from")]
    format: Option<String>,

    /// Abort on the first unreadable item instead of skipping it.
    #[arg(long)]
    strict: bool,

    /// Which instance owns a part that overlaps several equally.
    #[arg(long, value_enum, default_value_t = TieBreakArg::Lowest)]
    part_tie_break: TieBreakArg,
}

impl InputArgs {
    fn import_options(&self) -> ImportOptions {
        ImportOptions::new()
            .strict(self.strict)
            .part_assignment(PartAssignment::new(self.part_tie_break.into()))
    }

    fn load(&self) -> Result<Dataset, LabelbridgeError> {
        let (dataset, report) = Dataset::import_with_report(
            &self.input,
            self.format.as_deref(),
            FormatRegistry::builtin(),
            &self.import_options(),
        )?;
        if report.is_lossy() {
            eprint!("{}", report);
        }
        Ok(dataset)
    }
}

#[derive(clap::Args)]
struct DetectArgs {
    /// Dataset root directory.
    input: PathBuf,
}

#[derive(clap::Args)]
struct ConvertArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Output directory.
    #[arg(short, long)]
    output: PathBuf,

    /// Output format.
    #[arg(long = "to")]
    to: String,

    /// Copy media files next to the written annotations.
    #[arg(long)]
    save_media: bool,

    /// Write into a non-empty output directory.
    #[arg(long)]
    overwrite: bool,

    /// Also write one grayscale PNG per instance (mask-channel formats).
    #[arg(long)]
    save_instance_masks: bool,

    /// Worker threads for writing items.
    #[arg(short, long, env = "LABELBRIDGE_JOBS", default_value_t = 1)]
    jobs: usize,

    /// Output format for the conversion report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    report: OutputFormat,
}

#[derive(clap::Args)]
struct ValidateArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Read media headers and report missing media files.
    #[arg(long)]
    check_media: bool,

    /// Treat warnings as errors (exit non-zero if any warnings).
    #[arg(long)]
    strict_warnings: bool,

    /// Output format for the report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(clap::Args)]
struct StatsArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Number of labels to list in the histogram.
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Output format for the report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

/// Run the labelbridge CLI with already parsed arguments.
///
/// This is the main entry point for the CLI, called from `main.rs` after
/// logging is initialised.
pub fn run(cli: Cli) -> Result<(), LabelbridgeError> {
    match cli.command {
        Some(Commands::ListFormats) => run_list_formats(),
        Some(Commands::Detect(args)) => run_detect(args),
        Some(Commands::Convert(args)) => run_convert(args),
        Some(Commands::Validate(args)) => run_validate(args),
        Some(Commands::Stats(args)) => run_stats(args),
        None => {
            println!("labelbridge {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Convert dataset annotations between on-disk formats.");
            println!();
            println!("Run 'labelbridge --help' for usage information.");
            Ok(())
        }
    }
}

fn run_list_formats() -> Result<(), LabelbridgeError> {
    for plugin in FormatRegistry::builtin().plugins() {
        let capabilities: Vec<String> = plugin
            .converter
            .capabilities()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("{:<10} {}", plugin.name, capabilities.join(", "));
    }
    Ok(())
}

fn run_detect(args: DetectArgs) -> Result<(), LabelbridgeError> {
    let name = format::detect_format(&args.input, FormatRegistry::builtin())?;
    println!("{name}");
    Ok(())
}

fn run_convert(args: ConvertArgs) -> Result<(), LabelbridgeError> {
    let dataset = args.input.load()?;
    let options = ExportOptions::new()
        .save_media(args.save_media)
        .overwrite(args.overwrite)
        .strict(args.input.strict)
        .jobs(args.jobs)
        .save_instance_masks(args.save_instance_masks);
    let report = dataset.export(&args.output, &args.to, FormatRegistry::builtin(), &options)?;

    match args.report {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!(
                "Converted {} -> {}",
                args.input.input.display(),
                args.output.display()
            );
            print!("{}", report);
        }
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), LabelbridgeError> {
    let dataset = args.input.load()?;
    let opts = validation::ValidateOptions {
        strict: args.strict_warnings,
        check_media: args.check_media,
    };
    let report = validation::validate_dataset(&dataset, &opts);

    match args.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print!("{}", report),
    }

    let has_errors = report.error_count() > 0;
    let has_warnings = report.warning_count() > 0;

    if has_errors || (args.strict_warnings && has_warnings) {
        Err(LabelbridgeError::ValidationFailed {
            error_count: report.error_count(),
            warning_count: report.warning_count(),
            report,
        })
    } else {
        Ok(())
    }
}

fn run_stats(args: StatsArgs) -> Result<(), LabelbridgeError> {
    let dataset = args.input.load()?;
    let opts = stats::StatsOptions {
        top_labels: args.top,
        ..Default::default()
    };
    let report = stats::stats_dataset(&dataset, &opts);

    match args.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print!("{}", report),
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), LabelbridgeError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| LabelbridgeError::JsonWrite {
        path: PathBuf::from("<stdout>"),
        source,
    })?;
    println!("{json}");
    Ok(())
}
