//! Z-score standardization of the clustering feature matrix

use ndarray::{Array1, Array2, Axis};
use serde::Serialize;

/// Per-column mean and population variance fitted on a feature matrix.
///
/// Columns with zero variance are scaled by 1, so after centering they are
/// all zeros rather than NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub variance: Array1<f64>,
    scale: Array1<f64>,
}

/// Serializable scaling parameters of one feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureScale {
    pub feature: String,
    pub mean: f64,
    pub variance: f64,
}

impl StandardScaler {
    pub fn fit(features: &Array2<f64>) -> Self {
        let n_features = features.ncols();
        let mean = features
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let variance = if features.nrows() == 0 {
            Array1::zeros(n_features)
        } else {
            features.var_axis(Axis(0), 0.0)
        };
        let scale = variance.mapv(|v| {
            let std = v.sqrt();
            if std.is_finite() && std > f64::EPSILON {
                std
            } else {
                1.0
            }
        });

        Self {
            mean,
            variance,
            scale,
        }
    }

    pub fn transform(&self, features: &Array2<f64>) -> Array2<f64> {
        (features - &self.mean) / &self.scale
    }

    /// Fitted parameters labelled with feature names
    pub fn params(&self, names: &[&str]) -> Vec<FeatureScale> {
        names
            .iter()
            .zip(self.mean.iter().zip(self.variance.iter()))
            .map(|(name, (&mean, &variance))| FeatureScale {
                feature: name.to_string(),
                mean,
                variance,
            })
            .collect()
    }
}
