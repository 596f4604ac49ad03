//! Run configuration and defaults.
//!
//! All tunables are collected into an immutable [`RunConfig`] built once at
//! startup and passed by reference to every pipeline stage.

use anyhow::{bail, Result};
use std::path::PathBuf;

/// Default minimum chain coverage in bases (`-c`).
pub const DEFAULT_CHAIN_MIN: u32 = 100;

/// Default chain break gap in bases (`-s`).
pub const DEFAULT_CHAIN_BREAK: u32 = 500;

/// Default minimum alignment length in bases (`-a`).
pub const DEFAULT_ALIGN_MIN: u32 = 100;

/// Default minimum alignment identity (`-e`).
pub const DEFAULT_ALIGN_RATE: f64 = 0.7;

/// Immutable configuration for one alignment run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Adaptive-seed frequency cutoff: a seed is kept only if the matched
    /// prefix occurs at most this many times in the second genome.
    pub freq: usize,
    /// Minimum chain coverage on both genomes, in bases.
    pub chain_min: u32,
    /// Maximum a-gap between consecutive seeds of one chain, in bases.
    pub chain_break: u32,
    /// Minimum a-extent of a reported alignment, in bases.
    pub align_min: u32,
    /// Minimum identity of a reported alignment, in `[0.6, 1.0)`.
    pub align_rate: f64,
    /// Directory for scratch files.
    pub scratch_dir: PathBuf,
    /// Root name of the final `.las` output.
    pub out_root: PathBuf,
    /// Emit progress and statistics to stderr.
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            freq: 10,
            chain_min: DEFAULT_CHAIN_MIN,
            chain_break: DEFAULT_CHAIN_BREAK,
            align_min: DEFAULT_ALIGN_MIN,
            align_rate: DEFAULT_ALIGN_RATE,
            scratch_dir: PathBuf::from("/tmp"),
            out_root: PathBuf::from("out"),
            verbose: false,
        }
    }
}

impl RunConfig {
    /// Check parameter ranges. Called once after CLI parsing.
    pub fn validate(&self) -> Result<()> {
        if self.freq == 0 {
            bail!("The seed frequency cutoff (-f) must be at least 1.");
        }
        if self.freq > u8::MAX as usize {
            bail!(
                "The seed frequency cutoff (-f) cannot exceed {} (index count width).",
                u8::MAX
            );
        }
        if !(0.6..1.0).contains(&self.align_rate) {
            bail!("The alignment identity (-e) must lie in [0.6, 1.0).");
        }
        if self.align_min == 0 {
            bail!("The minimum alignment length (-a) must be positive.");
        }
        if self.chain_min == 0 {
            bail!("The minimum chain coverage (-c) must be positive.");
        }
        if !self.scratch_dir.is_dir() {
            bail!(
                "The scratch directory {} does not exist or is not a directory.",
                self.scratch_dir.display()
            );
        }
        Ok(())
    }

    /// Maximum fraction of differences an accepted alignment may carry.
    pub fn max_diff_fraction(&self) -> f64 {
        1.0 - self.align_rate
    }
}
