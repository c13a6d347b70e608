//! Feature table handed to the downstream churn classifier

use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::data::{columns, series_of};
use crate::error::{PipelineError, Stage};
use crate::model::SegmentedCustomer;

pub const CHURN: &str = "Churn";

/// Churn label: a customer who has not bought recently counts as churned
pub fn churn_label(customer: &SegmentedCustomer) -> i32 {
    1 - i32::from(customer.customer.features.recent_buyer)
}

/// Build the `CustomerID`-keyed feature subset plus the `Churn` label
pub fn model_input_frame(customers: &[SegmentedCustomer]) -> crate::Result<DataFrame> {
    if customers.is_empty() {
        return Err(PipelineError::EmptyInput { stage: Stage::Export });
    }

    let churned = customers.iter().filter(|c| churn_label(c) == 1).count();
    let retained = customers.len() - churned;
    if churned == 0 || retained == 0 {
        warn!(churned, retained, "model input has a single churn class");
    }
    info!(
        rows = customers.len(),
        churned,
        retained,
        churn_rate = churned as f64 / customers.len() as f64,
        "built model input table"
    );

    let df = DataFrame::new(vec![
        series_of(columns::CUSTOMER_ID, customers, |c| c.customer.record.customer_id),
        series_of(columns::AGE, customers, |c| c.customer.record.age),
        series_of(columns::TOTAL_SPEND, customers, |c| c.customer.record.total_spend),
        series_of(columns::ITEMS_PURCHASED, customers, |c| {
            c.customer.record.items_purchased
        }),
        series_of(columns::SATISFACTION_ENCODED, customers, |c| {
            c.customer.features.satisfaction_encoded
        }),
        series_of(columns::MEMBERSHIP_ENCODED, customers, |c| {
            c.customer.features.membership_encoded
        }),
        series_of(columns::AVG_SPEND_PER_ITEM, customers, |c| {
            c.customer.features.avg_spend_per_item
        }),
        series_of(columns::HIGH_SPENDER, customers, |c| {
            i32::from(c.customer.features.high_spender)
        }),
        series_of(columns::LOYALTY_SCORE, customers, |c| {
            c.customer.features.loyalty_score
        }),
        series_of(columns::RFM_SCORE, customers, |c| c.customer.features.rfm_score),
        series_of(columns::CUSTOMER_SEGMENT, customers, |c| c.segment as i64),
        series_of(CHURN, customers, churn_label),
    ])?;
    Ok(df)
}
