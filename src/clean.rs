//! Deduplication, imputation and text normalization of raw customer rows

use std::collections::HashSet;

use tracing::{info, warn};

use crate::data::{columns, CustomerRecord, RawCustomerRecord};
use crate::error::{PipelineError, Stage};
use crate::stats;

/// Fill value for a missing membership type
pub const UNKNOWN_MEMBERSHIP: &str = "Unknown";
/// Fill value for a missing satisfaction level
pub const NEUTRAL_SATISFACTION: &str = "Neutral";

/// Cleaning stage: first row per customer wins, gaps are filled from the
/// deduplicated population, text columns are normalized.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cleaner;

impl Cleaner {
    pub fn new() -> Self {
        Self
    }

    pub fn clean(&self, raw: Vec<RawCustomerRecord>) -> crate::Result<Vec<CustomerRecord>> {
        let input_rows = raw.len();
        let (unique, dropped) = dedup_first(raw);
        if dropped > 0 {
            warn!(dropped, "dropped rows with duplicate CustomerID, kept first occurrence");
        }
        if unique.is_empty() {
            return Err(PipelineError::EmptyInput { stage: Stage::Clean });
        }

        // Fill values come from the deduplicated population before any row is filled
        let present_ages: Vec<f64> = unique.iter().filter_map(|r| r.age).collect();
        let age_fill = stats::median(&present_ages)
            .ok_or_else(|| PipelineError::missing_column(Stage::Clean, columns::AGE))?;
        let city_fill = stats::mode_first(unique.iter().filter_map(|r| r.city.as_deref()))
            .map(str::to_owned)
            .ok_or_else(|| PipelineError::missing_column(Stage::Clean, columns::CITY))?;

        let imputed_ages = unique.len() - present_ages.len();
        let records: Vec<CustomerRecord> = unique
            .into_iter()
            .map(|r| CustomerRecord {
                customer_id: r.customer_id,
                age: r.age.unwrap_or(age_fill),
                gender: r.gender.as_deref().map(capitalize),
                city: title_case(r.city.as_deref().unwrap_or(&city_fill)),
                membership_type: title_case(
                    r.membership_type.as_deref().unwrap_or(UNKNOWN_MEMBERSHIP),
                ),
                satisfaction_level: capitalize(
                    r.satisfaction_level
                        .as_deref()
                        .unwrap_or(NEUTRAL_SATISFACTION),
                ),
                total_spend: r.total_spend,
                items_purchased: r.items_purchased,
                days_since_last_purchase: r.days_since_last_purchase,
                discount_applied: r.discount_applied,
            })
            .collect();

        info!(
            input_rows,
            output_rows = records.len(),
            imputed_ages,
            age_fill,
            city_fill = %city_fill,
            "cleaned customer records"
        );
        Ok(records)
    }
}

/// Keep the first row per `CustomerID`. Returns the survivors and the number
/// of rows dropped.
pub fn dedup_first(raw: Vec<RawCustomerRecord>) -> (Vec<RawCustomerRecord>, usize) {
    let total = raw.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<RawCustomerRecord> = raw
        .into_iter()
        .filter(|r| seen.insert(r.customer_id))
        .collect();
    let dropped = total - unique.len();
    (unique, dropped)
}

/// Trim, then upper-case the first character and lower-case the rest
pub fn capitalize(text: &str) -> String {
    let mut chars = text.trim().chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Trim, then upper-case every letter that does not follow another letter
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alpha = false;
    for c in text.trim().chars() {
        if c.is_alphabetic() {
            if previous_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(c);
            previous_alpha = false;
        }
    }
    out
}
