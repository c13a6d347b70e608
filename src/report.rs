//! Per-segment summary statistics and their console rendering

use std::collections::BTreeMap;

use polars::prelude::{DataFrame, NamedFrom, Series};
use serde::Serialize;
use tracing::info;

use crate::data::{columns, series_of};
use crate::error::{PipelineError, Stage};
use crate::model::{SegmentModel, SegmentedCustomer, SEGMENT_FEATURES};
use crate::stats;

/// Numeric columns aggregated per segment
pub const SUMMARY_COLUMNS: [&str; 8] = [
    columns::AGE,
    columns::TOTAL_SPEND,
    columns::ITEMS_PURCHASED,
    columns::AVG_SPEND_PER_ITEM,
    columns::LOYALTY_SCORE,
    columns::RFM_SCORE,
    columns::SATISFACTION_ENCODED,
    columns::MEMBERSHIP_ENCODED,
];

/// Value of a summary column for one customer; `None` when undefined
fn summary_value(c: &SegmentedCustomer, column: &str) -> Option<f64> {
    let record = &c.customer.record;
    let features = &c.customer.features;
    match column {
        columns::AGE => Some(record.age),
        columns::TOTAL_SPEND => Some(record.total_spend),
        columns::ITEMS_PURCHASED => Some(record.items_purchased as f64),
        columns::AVG_SPEND_PER_ITEM => features.avg_spend_per_item,
        columns::LOYALTY_SCORE => features.loyalty_score,
        columns::RFM_SCORE => features.rfm_score.map(f64::from),
        columns::SATISFACTION_ENCODED => Some(f64::from(features.satisfaction_encoded)),
        columns::MEMBERSHIP_ENCODED => Some(f64::from(features.membership_encoded)),
        _ => None,
    }
}

/// Mean, median, min and max over the defined values of one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColumnStats {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ColumnStats {
    fn of(values: &[f64]) -> Self {
        Self {
            mean: stats::mean(values),
            median: stats::median(values),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
        }
    }
}

/// Aggregate profile of one observed segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub segment: usize,
    /// Statistics in `SUMMARY_COLUMNS` order
    pub columns: Vec<(String, ColumnStats)>,
    pub cluster_size: usize,
    /// Share of the population in percent, rounded to two decimals
    pub cluster_percentage: f64,
}

impl ClusterSummary {
    pub fn stats(&self, column: &str) -> Option<&ColumnStats> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, stats)| stats)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Summarize every observed segment, in ascending label order
pub fn summarize(customers: &[SegmentedCustomer]) -> crate::Result<Vec<ClusterSummary>> {
    if customers.is_empty() {
        return Err(PipelineError::EmptyInput { stage: Stage::Report });
    }

    let mut by_segment: BTreeMap<usize, Vec<&SegmentedCustomer>> = BTreeMap::new();
    for c in customers {
        by_segment.entry(c.segment).or_default().push(c);
    }

    let total = customers.len() as f64;
    let summaries: Vec<ClusterSummary> = by_segment
        .into_iter()
        .map(|(segment, members)| {
            let columns = SUMMARY_COLUMNS
                .iter()
                .map(|&column| {
                    let values: Vec<f64> = members
                        .iter()
                        .filter_map(|c| summary_value(c, column))
                        .collect();
                    (column.to_string(), ColumnStats::of(&values))
                })
                .collect();
            ClusterSummary {
                segment,
                columns,
                cluster_size: members.len(),
                cluster_percentage: round2(members.len() as f64 / total * 100.0),
            }
        })
        .collect();

    info!(segments = summaries.len(), customers = customers.len(), "summarized segments");
    Ok(summaries)
}

/// Flatten summaries into `CustomerSegment`, `<Column>_<stat>`, `ClusterSize`,
/// `ClusterPercentage` columns
pub fn summary_frame(summaries: &[ClusterSummary]) -> crate::Result<DataFrame> {
    let mut series = vec![series_of(columns::CUSTOMER_SEGMENT, summaries, |s| {
        s.segment as i64
    })];

    for (index, column) in SUMMARY_COLUMNS.iter().enumerate() {
        let stat_columns: [(&str, fn(&ColumnStats) -> Option<f64>); 4] = [
            ("mean", |s| s.mean),
            ("median", |s| s.median),
            ("min", |s| s.min),
            ("max", |s| s.max),
        ];
        for (suffix, pick) in stat_columns {
            let values: Vec<Option<f64>> = summaries
                .iter()
                .map(|s| pick(&s.columns[index].1))
                .collect();
            series.push(Series::new(&format!("{column}_{suffix}"), values));
        }
    }

    series.push(series_of("ClusterSize", summaries, |s| s.cluster_size as i64));
    series.push(series_of("ClusterPercentage", summaries, |s| s.cluster_percentage));

    Ok(DataFrame::new(series)?)
}

/// Print cluster statistics to console
pub fn print_cluster_statistics(summaries: &[ClusterSummary], model: &SegmentModel, silhouette: f64) {
    let total: usize = summaries.iter().map(|s| s.cluster_size).sum();

    println!("\n=== Segment Statistics ===");
    println!("Number of clusters: {}", model.n_clusters);
    println!("Total customers: {}", total);
    println!("Within-cluster sum of squares (Inertia): {:.2}", model.inertia);
    println!("Silhouette score (sample): {:.3}", silhouette);

    println!("\nSegment sizes:");
    for s in summaries {
        println!(
            "  Segment {}: {} customers ({:.2}%)",
            s.segment, s.cluster_size, s.cluster_percentage
        );
    }

    println!("\nSegment means:");
    println!(
        "  Segment | {:>8} | {:>10} | {:>5} | {:>7} | {:>7} | {:>3}",
        "Age", "Spend", "Items", "Loyalty", "Sat", "RFM"
    );
    for s in summaries {
        let mean = |column: &str| s.stats(column).and_then(|st| st.mean).unwrap_or(f64::NAN);
        println!(
            "  {:7} | {:8.1} | {:10.2} | {:5.1} | {:7.3} | {:7.2} | {:3.1}",
            s.segment,
            mean(columns::AGE),
            mean(columns::TOTAL_SPEND),
            mean(columns::ITEMS_PURCHASED),
            mean(columns::LOYALTY_SCORE),
            mean(columns::SATISFACTION_ENCODED),
            mean(columns::RFM_SCORE),
        );
    }

    println!("\nCluster centroids (standardized):");
    println!("  Cluster | {}", SEGMENT_FEATURES.join(" | "));
    for (i, centroid) in model.centroids.outer_iter().enumerate() {
        let cells: Vec<String> = centroid.iter().map(|v| format!("{v:.2}")).collect();
        println!("  {:7} | {}", i, cells.join(" | "));
    }
}
