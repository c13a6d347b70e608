//! Population statistics shared by the cleaning, feature and reporting stages

use std::collections::HashMap;

/// Median of the values; the mean of the two middle values for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Most frequent value. Ties go to the value seen first.
pub fn mode_first<'a, I>(values: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    // value -> (count, first position)
    let mut counts: HashMap<&'a str, (usize, usize)> = HashMap::new();
    for (position, value) in values.into_iter().enumerate() {
        counts.entry(value).or_insert((0, position)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(value, _)| value)
}

/// Quantile of already sorted values with linear interpolation between
/// neighbouring order statistics.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Equal-frequency bin edges with duplicate edges merged.
///
/// A value `v` belongs to bin `i` when `edges[i] < v <= edges[i + 1]`; the
/// first bin is closed on the left. Populations with few distinct values end
/// up with fewer bins than requested. A single distinct value leaves one edge
/// and no bin at all, so every value is unbinned.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileBins {
    edges: Vec<f64>,
}

impl QuantileBins {
    /// Fit `quantiles` bins over the population. `None` for an empty population.
    pub fn fit(values: &[f64], quantiles: usize) -> Option<Self> {
        if values.is_empty() || quantiles == 0 {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mut edges: Vec<f64> = (0..=quantiles)
            .map(|i| quantile_sorted(&sorted, i as f64 / quantiles as f64))
            .collect();
        edges.dedup();

        Some(Self { edges })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of effective bins after merging duplicate edges
    pub fn len(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bin index of a value, clamped into the fitted range. `None` when the
    /// population collapsed to a single edge.
    pub fn bin(&self, value: f64) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let index = self.edges[1..].partition_point(|&edge| edge < value);
        Some(index.min(self.len() - 1))
    }
}
