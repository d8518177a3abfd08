//! Command-line front end for merging presentation packages.
//!
//! # Usage
//!
//! Append the slides of one deck to another:
//! ```sh
//! longan merge appendix.pptx deck.pptx merged.pptx
//! ```
//!
//! Append several decks in order and keep a report:
//! ```sh
//! longan merge part1.pptx deck.pptx merged.pptx \
//!     --append part2.pptx --append part3.pptx \
//!     --report merge-report.yaml
//! ```
//!
//! Check a package for dangling relationships and undeclared content types:
//! ```sh
//! longan verify merged.pptx
//! ```

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use longan::ooxml::merge::{MergeOptions, MergeReport, Merger};
use longan::ooxml::opc::{Package, SaveOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Merge Office Open XML presentations without breaking their relationships
#[derive(Parser, Debug)]
#[command(name = "longan", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (per-part progress)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append the slides of SOURCE to TARGET_BASE and write OUTPUT
    Merge(MergeArgs),
    /// List dangling relationships and parts without a content type
    Verify {
        /// Package to check
        #[arg(value_name = "PACKAGE")]
        package: PathBuf,
    },
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Package whose slides are appended
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Package the slides are appended to (left unchanged on disk)
    #[arg(value_name = "TARGET_BASE")]
    target: PathBuf,

    /// Where the merged package is written
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Further sources, merged after SOURCE in the order given
    #[arg(long, value_name = "PACKAGE")]
    append: Vec<PathBuf>,

    /// Force overwrite of an existing output file
    #[arg(short, long)]
    force: bool,

    /// Fail without writing output if the merge produced any warning
    #[arg(long)]
    strict: bool,

    /// Write the merge report as YAML
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Reuse media only when it comes from the same source part
    #[arg(long)]
    no_content_dedup: bool,

    /// Rebind layouts by path only, not by name
    #[arg(long)]
    no_layout_names: bool,

    /// How many relationship hops below a slide are followed
    #[arg(long, value_name = "N", default_value_t = MergeOptions::default().max_depth)]
    max_depth: usize,

    /// Do not add new slides to the last presentation section
    #[arg(long)]
    no_sections: bool,
}

impl MergeArgs {
    fn options(&self) -> MergeOptions {
        MergeOptions::new()
            .with_content_dedup(!self.no_content_dedup)
            .with_layout_names(!self.no_layout_names)
            .with_max_depth(self.max_depth)
            .with_sections(!self.no_sections)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let outcome = match &cli.command {
        Command::Merge(args) => run_merge(args),
        Command::Verify { package } => run_verify(package),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        },
    }
}

/// Log to stderr; `RUST_LOG` overrides the level picked by the flags.
fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn run_merge(args: &MergeArgs) -> Result<ExitCode> {
    let mut target = Package::open(&args.target)
        .with_context(|| format!("failed to open target {}", args.target.display()))?;

    let mut sources = Vec::with_capacity(1 + args.append.len());
    for path in std::iter::once(&args.source).chain(&args.append) {
        let pkg = Package::open(path)
            .with_context(|| format!("failed to open source {}", path.display()))?;
        sources.push(pkg);
    }

    let report = Merger::new(&mut target, args.options())
        .context("failed to prepare the target for merging")?
        .merge_all(&sources)
        .context("merge failed")?;

    if let Some(path) = &args.report {
        write_report(&report, path)?;
    }

    if args.strict && report.has_warnings() {
        error!(
            warnings = report.warnings.len(),
            "strict mode: output not written"
        );
        return Ok(ExitCode::from(2));
    }

    target
        .save(&args.output, &SaveOptions::default().with_overwrite(args.force))
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    info!(
        slides = report.added_units.len(),
        warnings = report.warnings.len(),
        output = %args.output.display(),
        "merged package written"
    );
    Ok(ExitCode::SUCCESS)
}

fn write_report(report: &MergeReport, path: &Path) -> Result<()> {
    let yaml = report.to_yaml()?;
    fs::write(path, yaml).with_context(|| format!("failed to write report {}", path.display()))
}

fn run_verify(path: &Path) -> Result<ExitCode> {
    let pkg = Package::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    if pkg.is_empty() {
        bail!("{} contains no parts", path.display());
    }

    let issues = pkg.check_integrity();
    for issue in &issues {
        println!("{}", issue);
    }

    if issues.is_empty() {
        info!(parts = pkg.len(), "package is consistent");
        Ok(ExitCode::SUCCESS)
    } else {
        info!(issues = issues.len(), "package has problems");
        Ok(ExitCode::from(2))
    }
}
