//! K-Means customer segmentation: the inertia sweep and the final fit

use std::collections::HashSet;

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::{Distance, L2Dist};
use ndarray::{Array1, Array2};
use polars::prelude::{DataFrame, NamedFrom, Series};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClusteringConfig;
use crate::error::{PipelineError, Stage};
use crate::features::EnrichedCustomer;
use crate::scale::StandardScaler;

/// Behavioral features used for clustering, in matrix column order
pub const SEGMENT_FEATURES: [&str; 6] = [
    "TotalSpend",
    "ItemsPurchased",
    "Age",
    "AvgSpendPerItem",
    "LoyaltyScore",
    "RFMScore",
];

/// Clustering input: raw and standardized feature matrices with the scaler
#[derive(Debug, Clone)]
pub struct SegmentMatrix {
    /// Standardized features (n_customers, 6)
    pub features: Array2<f64>,
    /// Features before standardization, undefined values replaced by 0
    pub raw_features: Array2<f64>,
    /// Customer IDs corresponding to each row
    pub customer_ids: Vec<i64>,
    pub scaler: StandardScaler,
}

impl SegmentMatrix {
    /// Build the matrix from enriched customers. Undefined ratios and scores
    /// count as 0 here only; the customers themselves are left untouched.
    pub fn from_customers(customers: &[EnrichedCustomer]) -> crate::Result<Self> {
        let mut raw = Vec::with_capacity(customers.len() * SEGMENT_FEATURES.len());
        for c in customers {
            raw.extend_from_slice(&[
                c.record.total_spend,
                c.record.items_purchased as f64,
                c.record.age,
                c.features.avg_spend_per_item.unwrap_or(0.0),
                c.features.loyalty_score.unwrap_or(0.0),
                c.features.rfm_score.map(f64::from).unwrap_or(0.0),
            ]);
        }
        let raw_features = Array2::from_shape_vec((customers.len(), SEGMENT_FEATURES.len()), raw)?;
        let customer_ids = customers.iter().map(|c| c.record.customer_id).collect();
        Self::from_raw(raw_features, customer_ids)
    }

    /// Standardize an already assembled raw matrix
    pub fn from_raw(raw_features: Array2<f64>, customer_ids: Vec<i64>) -> crate::Result<Self> {
        if raw_features.nrows() == 0 {
            return Err(PipelineError::EmptyInput { stage: Stage::Segment });
        }
        if raw_features.nrows() != customer_ids.len() {
            return Err(PipelineError::config(
                Stage::Segment,
                format!(
                    "{} feature rows but {} customer ids",
                    raw_features.nrows(),
                    customer_ids.len()
                ),
            ));
        }

        let scaler = StandardScaler::fit(&raw_features);
        let features = scaler.transform(&raw_features);
        Ok(Self {
            features,
            raw_features,
            customer_ids,
            scaler,
        })
    }

    /// Number of distinct standardized rows, the upper bound for K
    pub fn distinct_rows(&self) -> usize {
        self.features
            .outer_iter()
            .map(|row| row.iter().map(|v| (v + 0.0).to_bits()).collect::<Vec<u64>>())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// An enriched customer with its segment label
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedCustomer {
    pub customer: EnrichedCustomer,
    pub segment: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InertiaPoint {
    pub k: usize,
    pub inertia: f64,
}

/// Within-cluster sum of squares per candidate cluster count
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InertiaCurve {
    pub points: Vec<InertiaPoint>,
    /// Candidates larger than the number of distinct rows
    pub skipped: Vec<usize>,
}

impl InertiaCurve {
    pub fn inertia_for(&self, k: usize) -> Option<f64> {
        self.points.iter().find(|p| p.k == k).map(|p| p.inertia)
    }

    /// Two-column table (`K`, `Inertia`) for elbow-plot consumers
    pub fn frame(&self) -> crate::Result<DataFrame> {
        let ks: Vec<i64> = self.points.iter().map(|p| p.k as i64).collect();
        let inertias: Vec<f64> = self.points.iter().map(|p| p.inertia).collect();
        Ok(DataFrame::new(vec![
            Series::new("K", ks),
            Series::new("Inertia", inertias),
        ])?)
    }
}

/// Fitted K-Means segmentation
#[derive(Debug, Clone)]
pub struct SegmentModel {
    pub n_clusters: usize,
    /// Cluster assignment of every matrix row
    pub labels: Array1<usize>,
    /// Cluster centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
}

impl SegmentModel {
    /// Members per label; clusters nobody landed in count as 0
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.labels
            .iter()
            .fold(vec![0; self.n_clusters], |mut sizes, &label| {
                if let Some(size) = sizes.get_mut(label) {
                    *size += 1;
                }
                sizes
            })
    }

    /// Mean silhouette over the first `sample_size` rows. A single cluster or
    /// fewer than two rows score 0.
    pub fn compute_silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let n_samples = features.nrows().min(self.labels.len()).min(sample_size);
        if n_samples < 2 {
            return 0.0;
        }
        let total: f64 = (0..n_samples)
            .map(|i| self.silhouette_of(features, i, n_samples))
            .sum();
        total / n_samples as f64
    }

    fn silhouette_of(&self, features: &Array2<f64>, i: usize, n_samples: usize) -> f64 {
        let own = self.labels[i];
        // (distance sum, count) towards every cluster
        let mut totals = vec![(0.0_f64, 0_usize); self.n_clusters];
        for j in (0..n_samples).filter(|&j| j != i) {
            if let Some(entry) = totals.get_mut(self.labels[j]) {
                entry.0 += L2Dist.distance(features.row(i), features.row(j));
                entry.1 += 1;
            }
        }

        let mean = |(sum, count): (f64, usize)| (count > 0).then(|| sum / count as f64);
        let cohesion = totals.get(own).copied().and_then(mean).unwrap_or(0.0);
        let separation = totals
            .iter()
            .enumerate()
            .filter(|&(label, _)| label != own)
            .filter_map(|(_, &entry)| mean(entry))
            .reduce(f64::min);

        match separation {
            Some(b) if cohesion.max(b) > 0.0 => (b - cohesion) / cohesion.max(b),
            _ => 0.0,
        }
    }
}

/// Segmentation stage. The diagnostic sweep and the final fit are separate
/// operations; both share the seeding and restart policy of the config.
#[derive(Debug, Clone)]
pub struct Segmenter {
    config: ClusteringConfig,
}

impl Segmenter {
    pub fn new(config: ClusteringConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Fit every candidate K of the configured range and report its inertia.
    /// Candidates above the number of distinct rows are skipped; a sweep
    /// left with no candidate is an error.
    pub fn sweep(&self, matrix: &SegmentMatrix) -> crate::Result<InertiaCurve> {
        let curve = self.inertia_curve(matrix)?;
        if curve.points.is_empty() {
            return Err(PipelineError::config(
                Stage::Segment,
                format!(
                    "no sweep candidate in {}..={} fits {} distinct customer profiles",
                    self.config.k_min,
                    self.config.k_max,
                    matrix.distinct_rows()
                ),
            ));
        }
        Ok(curve)
    }

    /// Like [`Segmenter::sweep`], but an all-skipped range yields an empty
    /// curve instead of an error
    pub fn inertia_curve(&self, matrix: &SegmentMatrix) -> crate::Result<InertiaCurve> {
        let distinct = matrix.distinct_rows();
        let mut curve = InertiaCurve::default();

        for k in self.config.k_min..=self.config.k_max {
            if k > distinct {
                curve.skipped.push(k);
                continue;
            }
            let model = self.fit_kmeans(matrix, k)?;
            debug!(k, inertia = model.inertia, "inertia sweep candidate");
            curve.points.push(InertiaPoint {
                k,
                inertia: model.inertia,
            });
        }

        if !curve.skipped.is_empty() {
            warn!(
                skipped = ?curve.skipped,
                distinct,
                "sweep candidates exceed the number of distinct customer profiles"
            );
        }
        info!(candidates = curve.points.len(), "inertia sweep complete");
        Ok(curve)
    }

    /// Fit the final segmentation at `n_clusters`
    pub fn fit(&self, matrix: &SegmentMatrix, n_clusters: usize) -> crate::Result<SegmentModel> {
        let distinct = matrix.distinct_rows();
        if n_clusters == 0 || n_clusters > distinct {
            return Err(PipelineError::config(
                Stage::Segment,
                format!(
                    "requested {n_clusters} clusters but only {distinct} distinct customer profiles exist"
                ),
            ));
        }

        let model = self.fit_kmeans(matrix, n_clusters)?;
        info!(
            n_clusters,
            inertia = model.inertia,
            sizes = ?model.cluster_sizes(),
            "fitted customer segments"
        );
        Ok(model)
    }

    /// Fit at the configured production cluster count
    pub fn fit_configured(&self, matrix: &SegmentMatrix) -> crate::Result<SegmentModel> {
        self.fit(matrix, self.config.n_clusters)
    }

    /// Attach segment labels to the customers the model was fitted on
    pub fn assign(
        &self,
        customers: Vec<EnrichedCustomer>,
        model: &SegmentModel,
    ) -> crate::Result<Vec<SegmentedCustomer>> {
        if customers.len() != model.labels.len() {
            return Err(PipelineError::config(
                Stage::Segment,
                format!(
                    "model has {} labels for {} customers",
                    model.labels.len(),
                    customers.len()
                ),
            ));
        }

        Ok(customers
            .into_iter()
            .zip(model.labels.iter())
            .map(|(customer, &segment)| SegmentedCustomer { customer, segment })
            .collect())
    }

    fn fit_kmeans(&self, matrix: &SegmentMatrix, n_clusters: usize) -> crate::Result<SegmentModel> {
        let dataset = DatasetBase::from(matrix.features.clone());
        let rng = Xoshiro256Plus::seed_from_u64(self.config.seed);

        let model = KMeans::params_with(n_clusters, rng, L2Dist)
            .n_runs(self.config.n_runs)
            .max_n_iterations(self.config.max_iters as u64)
            .tolerance(self.config.tolerance)
            .fit(&dataset)?;

        let labels: Array1<usize> = model.predict(&matrix.features);
        let centroids = model.centroids().clone();
        let inertia = compute_inertia(&matrix.features, &labels, &centroids);

        Ok(SegmentModel {
            n_clusters,
            labels,
            centroids,
            inertia,
        })
    }
}

/// Squared distance of every row to its assigned centroid, summed
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    features
        .outer_iter()
        .zip(labels.iter())
        .filter(|&(_, &label)| label < centroids.nrows())
        .map(|(row, &label)| L2Dist.rdistance(row, centroids.row(label)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::data::fixtures::record;
    use crate::features::FeatureDeriver;

    /// Four well separated groups of five customers in the six feature dimensions
    fn create_test_matrix() -> SegmentMatrix {
        let centers = [
            [100.0, 2.0, 25.0, 50.0, 0.2, 3.0],
            [900.0, 20.0, 45.0, 45.0, 0.9, 12.0],
            [400.0, 8.0, 60.0, 50.0, 0.5, 7.0],
            [150.0, 15.0, 30.0, 10.0, 0.3, 9.0],
        ];
        let mut data = Vec::new();
        let mut ids = Vec::new();
        for (g, center) in centers.iter().enumerate() {
            for j in 0..5 {
                let jitter = j as f64 * 0.01;
                data.extend(center.iter().map(|v| v * (1.0 + jitter)));
                ids.push((g * 5 + j) as i64);
            }
        }
        let raw = Array2::from_shape_vec((20, 6), data).unwrap();
        SegmentMatrix::from_raw(raw, ids).unwrap()
    }

    fn segmenter() -> Segmenter {
        Segmenter::new(ClusteringConfig::default()).unwrap()
    }

    #[test]
    fn test_fit_recovers_separated_groups() {
        let matrix = create_test_matrix();
        let model = segmenter().fit(&matrix, 4).unwrap();

        assert_eq!(model.n_clusters, 4);
        assert_eq!(model.labels.len(), 20);
        assert_eq!(model.centroids.shape(), &[4, 6]);
        for group in 0..4 {
            let first = model.labels[group * 5];
            assert!((0..5).all(|j| model.labels[group * 5 + j] == first));
        }
        let distinct: HashSet<usize> = model.labels.iter().copied().collect();
        assert_eq!(distinct.len(), 4);
        assert_eq!(model.cluster_sizes(), vec![5, 5, 5, 5]);
    }

    #[test]
    fn test_fit_is_deterministic_for_a_seed() {
        let matrix = create_test_matrix();
        let first = segmenter().fit(&matrix, 3).unwrap();
        let second = segmenter().fit(&matrix, 3).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.inertia, second.inertia);
    }

    #[test]
    fn test_sweep_reports_every_candidate() {
        let matrix = create_test_matrix();
        let curve = segmenter().sweep(&matrix).unwrap();

        let ks: Vec<usize> = curve.points.iter().map(|p| p.k).collect();
        assert_eq!(ks, (2..=9).collect::<Vec<_>>());
        assert!(curve.skipped.is_empty());
        assert!(curve.points.iter().all(|p| p.inertia.is_finite() && p.inertia >= 0.0));
        // Four true groups: going from 2 to 4 clusters must reduce inertia
        assert!(curve.inertia_for(4).unwrap() < curve.inertia_for(2).unwrap());
    }

    #[test]
    fn test_sweep_skips_candidates_above_distinct_rows() {
        let raw = Array2::from_shape_vec(
            (6, 6),
            vec![
                1.0, 1.0, 1.0, 1.0, 1.0, 1.0, //
                1.0, 1.0, 1.0, 1.0, 1.0, 1.0, //
                5.0, 5.0, 5.0, 5.0, 5.0, 5.0, //
                5.0, 5.0, 5.0, 5.0, 5.0, 5.0, //
                9.0, 9.0, 9.0, 9.0, 9.0, 9.0, //
                9.0, 9.0, 9.0, 9.0, 9.0, 9.0, //
            ],
        )
        .unwrap();
        let matrix = SegmentMatrix::from_raw(raw, (0..6).collect()).unwrap();
        assert_eq!(matrix.distinct_rows(), 3);

        let curve = segmenter().sweep(&matrix).unwrap();
        let ks: Vec<usize> = curve.points.iter().map(|p| p.k).collect();
        assert_eq!(ks, vec![2, 3]);
        assert_eq!(curve.skipped, (4..=9).collect::<Vec<_>>());
        assert!(curve.inertia_for(3).unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_identical_rows_reject_four_clusters() {
        let raw = Array2::from_elem((10, 6), 3.0);
        let matrix = SegmentMatrix::from_raw(raw, (0..10).collect()).unwrap();
        assert!(matrix.features.iter().all(|&v| v == 0.0));

        let err = segmenter().fit(&matrix, 4).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration {
                stage: Stage::Segment,
                ..
            }
        ));
        assert!(segmenter().sweep(&matrix).is_err());
    }

    #[test]
    fn test_assign_checks_lengths() {
        let matrix = create_test_matrix();
        let model = segmenter().fit(&matrix, 4).unwrap();
        let err = segmenter().assign(Vec::new(), &model).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn test_silhouette_of_separated_groups_is_high() {
        let matrix = create_test_matrix();
        let model = segmenter().fit(&matrix, 4).unwrap();
        let score = model.compute_silhouette_sample(&matrix.features, 20);
        assert!(score > 0.5, "silhouette {score}");
    }

    #[test]
    fn test_inertia_curve_tolerates_all_skipped_range() {
        let raw = Array2::from_shape_vec(
            (4, 6),
            vec![
                1.0, 1.0, 1.0, 1.0, 1.0, 1.0, //
                1.0, 1.0, 1.0, 1.0, 1.0, 1.0, //
                5.0, 5.0, 5.0, 5.0, 5.0, 5.0, //
                5.0, 5.0, 5.0, 5.0, 5.0, 5.0, //
            ],
        )
        .unwrap();
        let matrix = SegmentMatrix::from_raw(raw, (0..4).collect()).unwrap();
        let config = ClusteringConfig {
            n_clusters: 2,
            k_min: 3,
            k_max: 5,
            ..ClusteringConfig::default()
        };
        let segmenter = Segmenter::new(config).unwrap();

        let curve = segmenter.inertia_curve(&matrix).unwrap();
        assert!(curve.points.is_empty());
        assert_eq!(curve.skipped, vec![3, 4, 5]);
        assert!(segmenter.sweep(&matrix).is_err());
        assert_eq!(segmenter.fit_configured(&matrix).unwrap().cluster_sizes(), vec![2, 2]);
    }

    #[test]
    fn test_single_cluster_silhouette_is_zero() {
        let matrix = create_test_matrix();
        let model = SegmentModel {
            n_clusters: 1,
            labels: Array1::zeros(20),
            centroids: Array2::zeros((1, 6)),
            inertia: 0.0,
        };
        assert_eq!(model.compute_silhouette_sample(&matrix.features, 20), 0.0);
        assert_eq!(model.cluster_sizes(), vec![20]);
    }

    #[test]
    fn test_inertia_is_squared_distance_to_centroids() {
        let features = Array2::from_shape_vec((3, 2), vec![0.0, 0.0, 3.0, 4.0, 1.0, 1.0]).unwrap();
        let labels = Array1::from(vec![0, 0, 1]);
        let centroids = Array2::from_shape_vec((2, 2), vec![0.0, 0.0, 1.0, 2.0]).unwrap();
        assert!((compute_inertia(&features, &labels, &centroids) - 26.0).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_rfm_counts_as_zero_in_matrix() {
        let records: Vec<_> = (0..4)
            .map(|i| record(i, 10.0 * (i + 1) as f64, 3, 5 + i))
            .collect();
        let enriched = FeatureDeriver::new(FeatureConfig::default())
            .unwrap()
            .derive(records)
            .unwrap();
        assert!(enriched.iter().all(|c| c.features.rfm_score.is_none()));

        let matrix = SegmentMatrix::from_customers(&enriched).unwrap();
        assert!(matrix.raw_features.column(5).iter().all(|&v| v == 0.0));
        assert!(matrix.features.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_inertia_frame_has_two_columns() {
        let curve = InertiaCurve {
            points: vec![
                InertiaPoint { k: 2, inertia: 10.0 },
                InertiaPoint { k: 3, inertia: 4.0 },
            ],
            skipped: Vec::new(),
        };
        let df = curve.frame().unwrap();
        assert_eq!(df.shape(), (2, 2));
    }
}
