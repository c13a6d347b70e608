//! Derived behavioral features: categorical encodings, spend ratios, flags and
//! the RFM and loyalty composites.
//!
//! Every population statistic is computed once from the complete input before
//! the first row is derived, so per-row values never see a partial aggregate.

use tracing::{info, warn};

use crate::config::{FeatureConfig, LoyaltyWeights};
use crate::data::CustomerRecord;
use crate::error::{PipelineError, Stage};
use crate::stats::{self, QuantileBins};

/// Encoding used when a satisfaction level is not recognised
pub const DEFAULT_SATISFACTION_CODE: i32 = 2;
/// Encoding used when a membership type is not recognised
pub const DEFAULT_MEMBERSHIP_CODE: i32 = 0;

/// Upper end of both ordinal encodings, used to scale them into [0, 1]
const MAX_ENCODED: f64 = 3.0;

/// Features derived for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFeatures {
    pub satisfaction_encoded: i32,
    pub membership_encoded: i32,
    /// `None` when the customer bought no items
    pub avg_spend_per_item: Option<f64>,
    /// `None` when the age is zero
    pub spend_per_age: Option<f64>,
    pub recent_buyer: bool,
    pub high_spender: bool,
    /// `None` when any RFM component has a single distinct value
    pub rfm_score: Option<i32>,
    /// `None` when every customer purchased today (no recency spread)
    pub loyalty_score: Option<f64>,
}

/// A cleaned record together with its derived features
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedCustomer {
    pub record: CustomerRecord,
    pub features: DerivedFeatures,
}

pub fn encode_satisfaction(level: &str) -> i32 {
    match level {
        "Unsatisfied" => 1,
        "Neutral" => 2,
        "Satisfied" => 3,
        _ => DEFAULT_SATISFACTION_CODE,
    }
}

pub fn encode_membership(kind: &str) -> i32 {
    match kind {
        "Unknown" => 0,
        "Silver" => 1,
        "Gold" => 2,
        "Platinum" => 3,
        _ => DEFAULT_MEMBERSHIP_CODE,
    }
}

/// `numerator / denominator`, undefined for a zero denominator
fn guarded_ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// Aggregates over the full population, fixed before any row is derived
#[derive(Debug, Clone)]
pub struct PopulationStats {
    pub spend_median: f64,
    pub max_days_since_purchase: i64,
    pub recency_bins: QuantileBins,
    pub frequency_bins: QuantileBins,
    pub monetary_bins: QuantileBins,
}

impl PopulationStats {
    pub fn compute(records: &[CustomerRecord], quantiles: usize) -> crate::Result<Self> {
        let empty = || PipelineError::EmptyInput { stage: Stage::Derive };

        let spend: Vec<f64> = records.iter().map(|r| r.total_spend).collect();
        let items: Vec<f64> = records.iter().map(|r| r.items_purchased as f64).collect();
        let days: Vec<f64> = records
            .iter()
            .map(|r| r.days_since_last_purchase as f64)
            .collect();

        Ok(Self {
            spend_median: stats::median(&spend).ok_or_else(empty)?,
            max_days_since_purchase: records
                .iter()
                .map(|r| r.days_since_last_purchase)
                .max()
                .ok_or_else(empty)?,
            recency_bins: QuantileBins::fit(&days, quantiles).ok_or_else(empty)?,
            frequency_bins: QuantileBins::fit(&items, quantiles).ok_or_else(empty)?,
            monetary_bins: QuantileBins::fit(&spend, quantiles).ok_or_else(empty)?,
        })
    }
}

/// Feature derivation stage
#[derive(Debug, Clone)]
pub struct FeatureDeriver {
    config: FeatureConfig,
}

impl FeatureDeriver {
    pub fn new(config: FeatureConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn derive(&self, records: Vec<CustomerRecord>) -> crate::Result<Vec<EnrichedCustomer>> {
        if records.is_empty() {
            return Err(PipelineError::EmptyInput { stage: Stage::Derive });
        }

        let population = PopulationStats::compute(&records, self.config.rfm_quantiles)?;
        if population.max_days_since_purchase == 0 {
            warn!("every customer purchased today; loyalty recency term is undefined");
        }
        if population.recency_bins.is_empty()
            || population.frequency_bins.is_empty()
            || population.monetary_bins.is_empty()
        {
            warn!("an RFM component has a single distinct value; RFM scores are undefined");
        }

        let enriched: Vec<EnrichedCustomer> = records
            .into_iter()
            .map(|record| {
                let features = self.derive_row(&record, &population);
                EnrichedCustomer { record, features }
            })
            .collect();

        let undefined_ratios = enriched
            .iter()
            .filter(|c| c.features.avg_spend_per_item.is_none())
            .count();
        info!(
            rows = enriched.len(),
            spend_median = population.spend_median,
            rfm_bins = ?(
                population.recency_bins.len(),
                population.frequency_bins.len(),
                population.monetary_bins.len()
            ),
            undefined_ratios,
            "derived customer features"
        );
        Ok(enriched)
    }

    /// Derive the features of one row against fixed population statistics
    pub fn derive_row(&self, record: &CustomerRecord, population: &PopulationStats) -> DerivedFeatures {
        let satisfaction_encoded = encode_satisfaction(&record.satisfaction_level);
        let membership_encoded = encode_membership(&record.membership_type);

        DerivedFeatures {
            satisfaction_encoded,
            membership_encoded,
            avg_spend_per_item: guarded_ratio(record.total_spend, record.items_purchased as f64),
            spend_per_age: guarded_ratio(record.total_spend, record.age),
            recent_buyer: record.days_since_last_purchase < self.config.recent_buyer_days,
            high_spender: record.total_spend > population.spend_median,
            rfm_score: self.rfm_score(record, population),
            loyalty_score: loyalty_score(
                &self.config.loyalty_weights,
                record.days_since_last_purchase,
                population.max_days_since_purchase,
                satisfaction_encoded,
                membership_encoded,
            ),
        }
    }

    /// Recency bins count down, frequency and monetary bins count up
    fn rfm_score(&self, record: &CustomerRecord, population: &PopulationStats) -> Option<i32> {
        let recency = population
            .recency_bins
            .bin(record.days_since_last_purchase as f64)?;
        let frequency = population
            .frequency_bins
            .bin(record.items_purchased as f64)?;
        let monetary = population.monetary_bins.bin(record.total_spend)?;
        Some(self.config.rfm_quantiles as i32 - recency as i32 + frequency as i32 + monetary as i32)
    }
}

/// Weighted loyalty composite in [0, 1]. Undefined when the population's
/// maximum recency is zero.
pub fn loyalty_score(
    weights: &LoyaltyWeights,
    days_since_purchase: i64,
    max_days_since_purchase: i64,
    satisfaction_encoded: i32,
    membership_encoded: i32,
) -> Option<f64> {
    let staleness = guarded_ratio(
        days_since_purchase as f64,
        max_days_since_purchase as f64,
    )?;
    Some(
        weights.recency * (1.0 - staleness)
            + weights.satisfaction * (f64::from(satisfaction_encoded) / MAX_ENCODED)
            + weights.membership * (f64::from(membership_encoded) / MAX_ENCODED),
    )
}
