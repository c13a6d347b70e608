//! End-to-end orchestration: clean, derive, segment, report, project and
//! export.
//!
//! Every stage runs to completion before anything is written, so a fatal
//! error never leaves a partial set of artifacts behind.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clean::Cleaner;
use crate::config::PipelineConfig;
use crate::data::{self, RawCustomerRecord};
use crate::features::{EnrichedCustomer, FeatureDeriver};
use crate::model::{
    InertiaCurve, SegmentMatrix, SegmentModel, SegmentedCustomer, Segmenter, SEGMENT_FEATURES,
};
use crate::projection::{self, Projection};
use crate::report::{self, ClusterSummary};
use crate::scale::FeatureScale;
use crate::training;

pub const SEGMENTED_CUSTOMERS_FILE: &str = "segmented_customers.csv";
pub const INERTIA_CURVE_FILE: &str = "inertia_curve.csv";
pub const CLUSTER_SUMMARY_FILE: &str = "cluster_summary.csv";
pub const MODEL_INPUT_FILE: &str = "model_input.csv";
pub const PROJECTION_FILE: &str = "segment_projection.csv";
pub const MANIFEST_FILE: &str = "run_manifest.json";

/// Everything a completed run produced, held in memory until exported
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub config: PipelineConfig,
    pub customers: Vec<SegmentedCustomer>,
    pub matrix: SegmentMatrix,
    pub inertia_curve: InertiaCurve,
    pub model: SegmentModel,
    pub summaries: Vec<ClusterSummary>,
    /// `None` when projection is disabled or the population is too small
    pub projection: Option<Projection>,
    pub silhouette: f64,
}

/// Locations of the files written by [`write_artifacts`]
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub segmented_customers: PathBuf,
    pub inertia_curve: PathBuf,
    pub cluster_summary: PathBuf,
    pub model_input: PathBuf,
    pub projection: Option<PathBuf>,
    pub manifest: PathBuf,
}

#[derive(Debug, Serialize)]
struct RunManifest<'a> {
    generated_at: DateTime<Utc>,
    customers: usize,
    n_clusters: usize,
    config: &'a PipelineConfig,
    inertia_curve: &'a InertiaCurve,
    scaler: Vec<FeatureScale>,
    cluster_sizes: Vec<usize>,
    inertia: f64,
    silhouette: f64,
    explained_variance_ratio: Option<&'a [f64]>,
}

/// Configured pipeline; each stage receives its own section of the config
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    cleaner: Cleaner,
    deriver: FeatureDeriver,
    segmenter: Segmenter,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            cleaner: Cleaner::new(),
            deriver: FeatureDeriver::new(config.features.clone())?,
            segmenter: Segmenter::new(config.clustering.clone())?,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load a customer CSV and run every stage on it
    pub fn run_file(&self, path: impl AsRef<Path>) -> crate::Result<PipelineOutput> {
        let raw = data::load_customers(path)?;
        self.run(raw)
    }

    pub fn run(&self, raw: Vec<RawCustomerRecord>) -> crate::Result<PipelineOutput> {
        let (enriched, matrix) = self.prepare(raw)?;

        // The sweep is diagnostic; only the final K has to fit the data
        let inertia_curve = self.segmenter.inertia_curve(&matrix)?;
        let model = self.segmenter.fit_configured(&matrix)?;
        if inertia_curve.points.is_empty() {
            warn!(
                skipped = ?inertia_curve.skipped,
                n_clusters = model.n_clusters,
                "no sweep candidate fits the data; continuing with the configured cluster count"
            );
        }
        let customers = self.segmenter.assign(enriched, &model)?;

        let summaries = report::summarize(&customers)?;
        let silhouette =
            model.compute_silhouette_sample(&matrix.features, self.config.output.silhouette_sample);

        let projection = if !self.config.output.projection {
            None
        } else if matrix.features.nrows() < 2 {
            warn!(rows = matrix.features.nrows(), "too few customers to project; skipping");
            None
        } else {
            Some(projection::project_2d(&matrix)?)
        };

        info!(
            customers = customers.len(),
            segments = summaries.len(),
            silhouette,
            "pipeline run complete"
        );
        Ok(PipelineOutput {
            config: self.config.clone(),
            customers,
            matrix,
            inertia_curve,
            model,
            summaries,
            projection,
            silhouette,
        })
    }

    /// Run the diagnostic inertia sweep without fitting the final model
    pub fn sweep_only(&self, raw: Vec<RawCustomerRecord>) -> crate::Result<InertiaCurve> {
        let (_, matrix) = self.prepare(raw)?;
        self.segmenter.sweep(&matrix)
    }

    fn prepare(
        &self,
        raw: Vec<RawCustomerRecord>,
    ) -> crate::Result<(Vec<EnrichedCustomer>, SegmentMatrix)> {
        let cleaned = self.cleaner.clean(raw)?;
        let enriched = self.deriver.derive(cleaned)?;
        let matrix = SegmentMatrix::from_customers(&enriched)?;
        info!(
            rows = matrix.features.nrows(),
            distinct = matrix.distinct_rows(),
            "prepared segmentation matrix"
        );
        Ok((enriched, matrix))
    }
}

/// Write every artifact of a completed run into `dir`, creating it if needed
pub fn write_artifacts(output: &PipelineOutput, dir: impl AsRef<Path>) -> crate::Result<ArtifactPaths> {
    let dir = dir.as_ref();

    // Build every table first so a failure leaves the directory untouched
    let mut segmented = data::segmented_frame(&output.customers)?;
    let mut curve = output.inertia_curve.frame()?;
    let mut summary = report::summary_frame(&output.summaries)?;
    let mut model_input = training::model_input_frame(&output.customers)?;
    let mut projected = output
        .projection
        .as_ref()
        .map(|p| p.frame(&output.matrix, &output.model))
        .transpose()?;
    let manifest = RunManifest {
        generated_at: Utc::now(),
        customers: output.customers.len(),
        n_clusters: output.model.n_clusters,
        config: &output.config,
        inertia_curve: &output.inertia_curve,
        scaler: output.matrix.scaler.params(&SEGMENT_FEATURES),
        cluster_sizes: output.model.cluster_sizes(),
        inertia: output.model.inertia,
        silhouette: output.silhouette,
        explained_variance_ratio: output
            .projection
            .as_ref()
            .map(|p| p.explained_variance_ratio.as_slice()),
    };
    let manifest_json = serde_json::to_string_pretty(&manifest)?;

    fs::create_dir_all(dir)?;
    let paths = ArtifactPaths {
        segmented_customers: dir.join(SEGMENTED_CUSTOMERS_FILE),
        inertia_curve: dir.join(INERTIA_CURVE_FILE),
        cluster_summary: dir.join(CLUSTER_SUMMARY_FILE),
        model_input: dir.join(MODEL_INPUT_FILE),
        projection: projected.as_ref().map(|_| dir.join(PROJECTION_FILE)),
        manifest: dir.join(MANIFEST_FILE),
    };

    data::write_csv(&mut segmented, &paths.segmented_customers)?;
    data::write_csv(&mut curve, &paths.inertia_curve)?;
    data::write_csv(&mut summary, &paths.cluster_summary)?;
    data::write_csv(&mut model_input, &paths.model_input)?;
    if let (Some(df), Some(path)) = (projected.as_mut(), paths.projection.as_ref()) {
        data::write_csv(df, path)?;
    }
    fs::write(&paths.manifest, manifest_json)?;

    info!(dir = %dir.display(), "wrote run artifacts");
    Ok(paths)
}

/// Write only the inertia curve, for sweep-only runs
pub fn write_inertia_curve(curve: &InertiaCurve, dir: impl AsRef<Path>) -> crate::Result<PathBuf> {
    let dir = dir.as_ref();
    let mut df = curve.frame()?;
    fs::create_dir_all(dir)?;
    let path = dir.join(INERTIA_CURVE_FILE);
    data::write_csv(&mut df, &path)?;
    Ok(path)
}
