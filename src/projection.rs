//! Principal-component projection of the standardized segmentation matrix,
//! consumed by plotting tools that render segments in two dimensions.

use ndarray::{Array1, Array2, Axis};
use polars::prelude::{DataFrame, NamedFrom, Series};
use serde::Serialize;
use tracing::debug;

use crate::data::columns;
use crate::error::{PipelineError, Stage};
use crate::model::{SegmentMatrix, SegmentModel};

const MAX_SWEEPS: usize = 100;
const OFF_DIAGONAL_TOLERANCE: f64 = 1e-20;

/// Projected coordinates plus the share of variance each component explains
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    #[serde(skip)]
    pub coordinates: Array2<f64>,
    pub explained_variance_ratio: Vec<f64>,
}

impl Projection {
    /// `CustomerID`, `CustomerSegment`, `PC1`, `PC2`, ... table
    pub fn frame(&self, matrix: &SegmentMatrix, model: &SegmentModel) -> crate::Result<DataFrame> {
        let mut series = vec![
            Series::new(columns::CUSTOMER_ID, matrix.customer_ids.clone()),
            Series::new(
                columns::CUSTOMER_SEGMENT,
                model.labels.iter().map(|&l| l as i64).collect::<Vec<i64>>(),
            ),
        ];
        for (i, component) in self.coordinates.columns().into_iter().enumerate() {
            series.push(Series::new(&format!("PC{}", i + 1), component.to_vec()));
        }
        Ok(DataFrame::new(series)?)
    }
}

/// Project the standardized features onto their leading principal components
pub fn project(features: &Array2<f64>, n_components: usize) -> crate::Result<Projection> {
    let (n_rows, n_features) = features.dim();
    if n_rows < 2 {
        return Err(PipelineError::config(
            Stage::Project,
            format!("projection needs at least 2 rows, got {n_rows}"),
        ));
    }
    if n_components == 0 || n_components > n_features {
        return Err(PipelineError::config(
            Stage::Project,
            format!("cannot keep {n_components} of {n_features} components"),
        ));
    }

    let mean = features
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(n_features));
    let centered = features - &mean;
    let covariance = centered.t().dot(&centered) / (n_rows - 1) as f64;

    let (eigenvalues, eigenvectors) = symmetric_eigen(&covariance);

    let mut order: Vec<usize> = (0..n_features).collect();
    order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));

    let mut components = Array2::<f64>::zeros((n_features, n_components));
    for (target, &source) in order.iter().take(n_components).enumerate() {
        let mut vector = eigenvectors.column(source).to_owned();
        // Fix the sign so the largest-magnitude loading is positive
        let pivot = vector
            .iter()
            .copied()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            vector.mapv_inplace(|v| -v);
        }
        components.column_mut(target).assign(&vector);
    }

    let total_variance: f64 = eigenvalues.iter().map(|v| v.max(0.0)).sum();
    let explained_variance_ratio = order
        .iter()
        .take(n_components)
        .map(|&i| {
            if total_variance > 0.0 {
                eigenvalues[i].max(0.0) / total_variance
            } else {
                0.0
            }
        })
        .collect();

    let coordinates = centered.dot(&components);
    debug!(?explained_variance_ratio, "computed principal component projection");
    Ok(Projection {
        coordinates,
        explained_variance_ratio,
    })
}

/// Eigen-decomposition of a small symmetric matrix by cyclic Jacobi
/// rotations. Returns eigenvalues and the matching eigenvectors as columns.
fn symmetric_eigen(matrix: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = matrix.nrows();
    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);

    for _ in 0..MAX_SWEEPS {
        let off_diagonal: f64 = (0..n)
            .flat_map(|p| (0..n).filter(move |&q| q != p).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]].powi(2))
            .sum();
        if off_diagonal < OFF_DIAGONAL_TOLERANCE {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    (a.diag().to_owned(), v)
}

/// First two principal components, the layout plotting consumers expect
pub fn project_2d(matrix: &SegmentMatrix) -> crate::Result<Projection> {
    project(&matrix.features, 2)
}
