//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::PipelineConfig;

/// Customer retention feature engineering and K-Means segmentation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input customer CSV file
    #[arg(short, long, default_value = "data/combined_data.csv")]
    pub input: PathBuf,

    /// Directory the run artifacts are written to
    #[arg(short, long, default_value = "reports")]
    pub output_dir: PathBuf,

    /// Optional TOML configuration file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of clusters for the final segmentation
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Seed for K-Means initialization
    #[arg(long)]
    pub seed: Option<u64>,

    /// K-Means restarts per fit
    #[arg(long)]
    pub n_runs: Option<usize>,

    /// Maximum iterations for K-Means algorithm
    #[arg(long)]
    pub max_iters: Option<usize>,

    /// Tolerance for K-Means convergence
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Only run the inertia sweep and write the elbow curve
    #[arg(long)]
    pub sweep_only: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Overlay the flags that were given on top of a loaded configuration
    pub fn apply(&self, config: &mut PipelineConfig) {
        let clustering = &mut config.clustering;
        if let Some(k) = self.clusters {
            clustering.n_clusters = k;
        }
        if let Some(seed) = self.seed {
            clustering.seed = seed;
        }
        if let Some(n_runs) = self.n_runs {
            clustering.n_runs = n_runs;
        }
        if let Some(max_iters) = self.max_iters {
            clustering.max_iters = max_iters;
        }
        if let Some(tolerance) = self.tolerance {
            clustering.tolerance = tolerance;
        }
    }

    /// Filter directive for the log subscriber; `--verbose` forces debug
    pub fn log_filter(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}
