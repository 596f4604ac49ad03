//! CLI entry point for galign.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use galign::config::RunConfig;
use galign::pipeline;

/// Adaptive-seed whole-genome aligner.
///
/// Computes local alignments between two assemblies from their pre-built
/// k-mer indices and writes a merged `.las` file.
#[derive(Parser, Debug)]
#[command(name = "galign")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// First (a-side) indexed source root
    src1: PathBuf,

    /// Second (b-side) indexed source root
    src2: PathBuf,

    /// Adaptive seed count cutoff (required)
    #[arg(short = 'f', long = "frequency")]
    frequency: usize,

    /// Minimum seed chain coverage in bases
    #[arg(short = 'c', long = "chain-min", default_value = "100")]
    chain_min: u32,

    /// Maximum a-gap between chained seeds in bases
    #[arg(short = 's', long = "chain-break", default_value = "500")]
    chain_break: u32,

    /// Minimum alignment length in bases
    #[arg(short = 'a', long = "align-min", default_value = "100")]
    align_min: u32,

    /// Minimum alignment identity, in [0.6, 1.0)
    #[arg(short = 'e', long = "identity", default_value = "0.7")]
    identity: f64,

    /// Scratch directory for temporary files
    #[arg(short = 'P', long = "scratch", default_value = "/tmp")]
    scratch: PathBuf,

    /// Output root (default: <src1-stem>.<src2-stem>)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Report progress and statistics on stderr
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn default_out_root(src1: &PathBuf, src2: &PathBuf) -> Result<PathBuf> {
    let stem = |p: &PathBuf| {
        p.file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
    };
    match (stem(src1), stem(src2)) {
        (Some(a), Some(b)) => Ok(PathBuf::from(format!("{}.{}", a, b))),
        _ => bail!("Cannot derive an output name; pass -o explicitly."),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let out_root = match args.output {
        Some(ref o) => o.clone(),
        None => default_out_root(&args.src1, &args.src2)?,
    };

    let config = RunConfig {
        freq: args.frequency,
        chain_min: args.chain_min,
        chain_break: args.chain_break,
        align_min: args.align_min,
        align_rate: args.identity,
        scratch_dir: args.scratch.clone(),
        out_root,
        verbose: args.verbose,
    };
    config.validate()?;

    pipeline::run(&config, &args.src1, &args.src2)?;

    if args.verbose {
        eprintln!("Done!");
    }
    Ok(())
}
