//! RetainForge: customer retention feature engineering and K-Means segmentation
//!
//! This is the main entrypoint that loads configuration, runs the pipeline
//! and writes the run artifacts.

use anyhow::{Context, Result};
use clap::Parser;
use retainforge::{pipeline, report, Args, Pipeline, PipelineConfig};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    args.apply(&mut config);

    if args.verbose {
        println!("RetainForge - Customer Retention Segmentation");
        println!("=============================================\n");
    }

    let pipeline = Pipeline::new(config).context("invalid pipeline configuration")?;
    if args.sweep_only {
        run_sweep(&args, &pipeline)
    } else {
        run_full_pipeline(&args, &pipeline)
    }
}

/// RUST_LOG wins; otherwise `--log-level`, raised to debug by `--verbose`
fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run only the inertia sweep and write the elbow curve
fn run_sweep(args: &Args, pipeline: &Pipeline) -> Result<()> {
    println!("=== Inertia Sweep ===\n");
    let start_time = Instant::now();

    let raw = retainforge::load_customers(&args.input)
        .with_context(|| format!("failed to load customers from {}", args.input.display()))?;
    let curve = pipeline.sweep_only(raw)?;

    for point in &curve.points {
        println!("K = {}: inertia {:.2}", point.k, point.inertia);
    }
    if !curve.skipped.is_empty() {
        println!("Skipped K (too few distinct customers): {:?}", curve.skipped);
    }

    let path = pipeline::write_inertia_curve(&curve, &args.output_dir)
        .with_context(|| format!("failed to write {}", args.output_dir.display()))?;
    println!("\nInertia curve saved to: {}", path.display());
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Run full segmentation pipeline
fn run_full_pipeline(args: &Args, pipeline: &Pipeline) -> Result<()> {
    println!("=== Full Segmentation Pipeline ===\n");

    let start_time = Instant::now();
    let clustering = &pipeline.config().clustering;

    if args.verbose {
        println!("Input file: {}", args.input.display());
        println!("Number of clusters: {}", clustering.n_clusters);
        println!("Sweep range: {}..={}", clustering.k_min, clustering.k_max);
        println!("Seed: {}, restarts: {}", clustering.seed, clustering.n_runs);
    }

    let output = pipeline
        .run_file(&args.input)
        .with_context(|| format!("pipeline failed on {}", args.input.display()))?;
    let run_time = start_time.elapsed();

    println!("✓ Segmented {} customers", output.customers.len());
    if args.verbose {
        println!("  Processing time: {:.2}s", run_time.as_secs_f64());
        println!("  Features shape: {:?}", output.matrix.features.shape());
        println!("\nInertia curve:");
        for point in &output.inertia_curve.points {
            println!("  K = {}: {:.2}", point.k, point.inertia);
        }
    }

    report::print_cluster_statistics(&output.summaries, &output.model, output.silhouette);

    if let Some(projection) = &output.projection {
        println!(
            "\nExplained variance (PC1, PC2): {:?}",
            projection
                .explained_variance_ratio
                .iter()
                .map(|r| format!("{:.3}", r))
                .collect::<Vec<_>>()
        );
    }

    let paths = pipeline::write_artifacts(&output, &args.output_dir)
        .with_context(|| format!("failed to write artifacts to {}", args.output_dir.display()))?;

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Segmented customers saved to: {}", paths.segmented_customers.display());
    println!("Cluster summary saved to: {}", paths.cluster_summary.display());
    println!("Model input saved to: {}", paths.model_input.display());
    println!("Run manifest saved to: {}", paths.manifest.display());

    Ok(())
}
