//! Pipeline configuration, loadable from TOML and overridable from the CLI

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Stage};

/// Weights of the three loyalty terms. Must be non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoyaltyWeights {
    pub recency: f64,
    pub satisfaction: f64,
    pub membership: f64,
}

impl Default for LoyaltyWeights {
    fn default() -> Self {
        Self {
            recency: 0.4,
            satisfaction: 0.3,
            membership: 0.3,
        }
    }
}

/// Feature derivation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Customers with fewer days since last purchase count as recent buyers
    pub recent_buyer_days: i64,
    /// Number of equal-frequency bins used for each RFM component
    pub rfm_quantiles: usize,
    pub loyalty_weights: LoyaltyWeights,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            recent_buyer_days: 30,
            rfm_quantiles: 5,
            loyalty_weights: LoyaltyWeights::default(),
        }
    }
}

/// K-Means settings for both the inertia sweep and the final fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Cluster count used for the final segment assignment
    pub n_clusters: usize,
    /// Smallest candidate of the inertia sweep
    pub k_min: usize,
    /// Largest candidate of the inertia sweep (inclusive)
    pub k_max: usize,
    pub seed: u64,
    /// Restarts per fit; the lowest-inertia restart wins
    pub n_runs: usize,
    pub max_iters: usize,
    pub tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            n_clusters: 4,
            k_min: 2,
            k_max: 9,
            seed: 42,
            n_runs: 10,
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

/// Artifact settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Compute the principal-component projection for plotting consumers
    pub projection: bool,
    /// Rows sampled for the silhouette diagnostic
    pub silhouette_sample: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            projection: true,
            silhouette_sample: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: FeatureConfig,
    pub clustering: ClusteringConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject settings no stage can run with
    pub fn validate(&self) -> crate::Result<()> {
        self.features.validate()?;
        self.clustering.validate()
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.rfm_quantiles == 0 {
            return Err(PipelineError::config(
                Stage::Derive,
                "rfm_quantiles must be at least 1",
            ));
        }
        if self.recent_buyer_days < 0 {
            return Err(PipelineError::config(
                Stage::Derive,
                "recent_buyer_days must not be negative",
            ));
        }

        let w = &self.loyalty_weights;
        if [w.recency, w.satisfaction, w.membership]
            .iter()
            .any(|x| !x.is_finite() || *x < 0.0)
        {
            return Err(PipelineError::config(
                Stage::Derive,
                "loyalty weights must be finite and non-negative",
            ));
        }
        let total = w.recency + w.satisfaction + w.membership;
        if (total - 1.0).abs() > 1e-9 {
            return Err(PipelineError::config(
                Stage::Derive,
                format!("loyalty weights must sum to 1, got {total}"),
            ));
        }
        Ok(())
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.n_clusters == 0 {
            return Err(PipelineError::config(
                Stage::Segment,
                "n_clusters must be at least 1",
            ));
        }
        if self.k_min == 0 || self.k_min > self.k_max {
            return Err(PipelineError::config(
                Stage::Segment,
                format!(
                    "sweep range {}..={} is empty or starts at zero",
                    self.k_min, self.k_max
                ),
            ));
        }
        if self.n_runs == 0 || self.max_iters == 0 {
            return Err(PipelineError::config(
                Stage::Segment,
                "n_runs and max_iters must be at least 1",
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(PipelineError::config(
                Stage::Segment,
                "tolerance must be a positive number",
            ));
        }
        Ok(())
    }
}
