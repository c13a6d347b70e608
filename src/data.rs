//! Customer record types plus CSV loading and export using Polars

use std::fs::File;
use std::path::Path;

use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{PipelineError, Stage};
use crate::model::SegmentedCustomer;

/// Canonical column names used for ingestion and every exported table
pub mod columns {
    pub const CUSTOMER_ID: &str = "CustomerID";
    pub const AGE: &str = "Age";
    pub const GENDER: &str = "Gender";
    pub const CITY: &str = "City";
    pub const MEMBERSHIP_TYPE: &str = "MembershipType";
    pub const SATISFACTION_LEVEL: &str = "SatisfactionLevel";
    pub const TOTAL_SPEND: &str = "TotalSpend";
    pub const ITEMS_PURCHASED: &str = "ItemsPurchased";
    pub const DAYS_SINCE_LAST_PURCHASE: &str = "DaysSinceLastPurchase";
    pub const DISCOUNT_APPLIED: &str = "DiscountApplied";

    pub const SATISFACTION_ENCODED: &str = "SatisfactionEncoded";
    pub const MEMBERSHIP_ENCODED: &str = "MembershipEncoded";
    pub const AVG_SPEND_PER_ITEM: &str = "AvgSpendPerItem";
    pub const SPEND_PER_AGE: &str = "SpendPerAge";
    pub const RECENT_BUYER: &str = "RecentBuyer";
    pub const HIGH_SPENDER: &str = "HighSpender";
    pub const RFM_SCORE: &str = "RFMScore";
    pub const LOYALTY_SCORE: &str = "LoyaltyScore";

    pub const CUSTOMER_SEGMENT: &str = "CustomerSegment";
}

/// Raw attributes every input table must carry
pub const REQUIRED_COLUMNS: [&str; 10] = [
    columns::CUSTOMER_ID,
    columns::AGE,
    columns::GENDER,
    columns::CITY,
    columns::MEMBERSHIP_TYPE,
    columns::SATISFACTION_LEVEL,
    columns::TOTAL_SPEND,
    columns::ITEMS_PURCHASED,
    columns::DAYS_SINCE_LAST_PURCHASE,
    columns::DISCOUNT_APPLIED,
];

/// A customer row as ingested, before cleaning
#[derive(Debug, Clone, PartialEq)]
pub struct RawCustomerRecord {
    pub customer_id: i64,
    pub age: Option<f64>,
    pub gender: Option<String>,
    pub city: Option<String>,
    pub membership_type: Option<String>,
    pub satisfaction_level: Option<String>,
    pub total_spend: f64,
    pub items_purchased: i64,
    pub days_since_last_purchase: i64,
    pub discount_applied: bool,
}

/// A cleaned customer row: imputed attributes are always present
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub customer_id: i64,
    pub age: f64,
    pub gender: Option<String>,
    pub city: String,
    pub membership_type: String,
    pub satisfaction_level: String,
    pub total_spend: f64,
    pub items_purchased: i64,
    pub days_since_last_purchase: i64,
    pub discount_applied: bool,
}

/// Load a customer CSV and convert it into raw records
///
/// # Arguments
/// * `file_path` - Path to the CSV file; headers are matched loosely, so
///   `Customer ID` and `CustomerID` name the same column
pub fn load_customers(file_path: impl AsRef<Path>) -> crate::Result<Vec<RawCustomerRecord>> {
    let path = file_path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    info!(
        rows = df.height(),
        columns = df.width(),
        path = %path.display(),
        "loaded customer table"
    );

    records_from_frame(&df)
}

/// Convert a DataFrame into raw records, failing fast on absent columns
pub fn records_from_frame(df: &DataFrame) -> crate::Result<Vec<RawCustomerRecord>> {
    // Resolve everything up front so a missing column aborts before row checks
    let ids = float_column(df, columns::CUSTOMER_ID)?;
    let ages = float_column(df, columns::AGE)?;
    let genders = text_column(df, columns::GENDER)?;
    let cities = text_column(df, columns::CITY)?;
    let memberships = text_column(df, columns::MEMBERSHIP_TYPE)?;
    let satisfactions = text_column(df, columns::SATISFACTION_LEVEL)?;
    let spends = float_column(df, columns::TOTAL_SPEND)?;
    let items = float_column(df, columns::ITEMS_PURCHASED)?;
    let days = float_column(df, columns::DAYS_SINCE_LAST_PURCHASE)?;
    let discounts = text_column(df, columns::DISCOUNT_APPLIED)?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let row = i + 1;
        let discount_applied = match discounts[i].as_deref() {
            None => false,
            Some(text) => parse_flag(text).ok_or_else(|| {
                invalid_value(
                    columns::DISCOUNT_APPLIED,
                    row,
                    format!("`{text}` is not a boolean"),
                )
            })?,
        };

        records.push(RawCustomerRecord {
            customer_id: require_count(ids[i], columns::CUSTOMER_ID, row)?,
            age: ages[i],
            gender: genders[i].clone(),
            city: cities[i].clone(),
            membership_type: memberships[i].clone(),
            satisfaction_level: satisfactions[i].clone(),
            total_spend: require_amount(spends[i], columns::TOTAL_SPEND, row)?,
            items_purchased: require_count(items[i], columns::ITEMS_PURCHASED, row)?,
            days_since_last_purchase: require_count(
                days[i],
                columns::DAYS_SINCE_LAST_PURCHASE,
                row,
            )?,
            discount_applied,
        });
    }

    Ok(records)
}

/// Build the enriched and segmented customer table
pub fn segmented_frame(customers: &[SegmentedCustomer]) -> crate::Result<DataFrame> {
    let df = DataFrame::new(vec![
        series_of(columns::CUSTOMER_ID, customers, |c| c.customer.record.customer_id),
        series_of(columns::AGE, customers, |c| c.customer.record.age),
        series_of(columns::GENDER, customers, |c| c.customer.record.gender.clone()),
        series_of(columns::CITY, customers, |c| c.customer.record.city.clone()),
        series_of(columns::MEMBERSHIP_TYPE, customers, |c| {
            c.customer.record.membership_type.clone()
        }),
        series_of(columns::SATISFACTION_LEVEL, customers, |c| {
            c.customer.record.satisfaction_level.clone()
        }),
        series_of(columns::TOTAL_SPEND, customers, |c| c.customer.record.total_spend),
        series_of(columns::ITEMS_PURCHASED, customers, |c| {
            c.customer.record.items_purchased
        }),
        series_of(columns::DAYS_SINCE_LAST_PURCHASE, customers, |c| {
            c.customer.record.days_since_last_purchase
        }),
        series_of(columns::DISCOUNT_APPLIED, customers, |c| {
            i32::from(c.customer.record.discount_applied)
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
        series_of(columns::SPEND_PER_AGE, customers, |c| {
            c.customer.features.spend_per_age
        }),
        series_of(columns::RECENT_BUYER, customers, |c| {
            i32::from(c.customer.features.recent_buyer)
        }),
        series_of(columns::HIGH_SPENDER, customers, |c| {
            i32::from(c.customer.features.high_spender)
        }),
        series_of(columns::RFM_SCORE, customers, |c| c.customer.features.rfm_score),
        series_of(columns::LOYALTY_SCORE, customers, |c| {
            c.customer.features.loyalty_score
        }),
        series_of(columns::CUSTOMER_SEGMENT, customers, |c| c.segment as i64),
    ])?;
    Ok(df)
}

/// Write a DataFrame as CSV with a header row
pub fn write_csv(df: &mut DataFrame, path: &Path) -> crate::Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    debug!(rows = df.height(), path = %path.display(), "wrote table");
    Ok(())
}

/// Build a named series by projecting every row through `f`
pub(crate) fn series_of<R, T, F>(name: &str, rows: &[R], f: F) -> Series
where
    F: Fn(&R) -> T,
    Series: NamedFrom<Vec<T>, [T]>,
{
    Series::new(name, rows.iter().map(f).collect::<Vec<T>>())
}

fn canonical_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn resolve_column<'a>(df: &'a DataFrame, name: &str) -> crate::Result<&'a Series> {
    let wanted = canonical_name(name);
    let actual = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .find(|n| canonical_name(n) == wanted)
        .ok_or_else(|| PipelineError::missing_column(Stage::Ingest, name))?;
    Ok(df.column(&actual)?)
}

/// Numeric column with NaN read as missing. A cell that holds text but does
/// not parse as a number is rejected with its row.
fn float_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<f64>>> {
    let source = resolve_column(df, name)?;
    let numeric = source.cast(&DataType::Float64)?;
    let text = source.cast(&DataType::String)?;

    numeric
        .f64()?
        .into_iter()
        .zip(text.str()?.into_iter())
        .enumerate()
        .map(|(i, (value, cell))| match (value, cell) {
            (None, Some(cell)) if !cell.trim().is_empty() => Err(invalid_value(
                name,
                i + 1,
                format!("`{cell}` is not a number"),
            )),
            (value, _) => Ok(value.filter(|x| !x.is_nan())),
        })
        .collect()
}

fn text_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<String>>> {
    let series = resolve_column(df, name)?.cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|v| v.filter(|s| !s.is_empty()).map(str::to_owned))
        .collect();
    Ok(values)
}

fn invalid_value(column: &str, row: usize, reason: impl Into<String>) -> PipelineError {
    PipelineError::InvalidValue {
        stage: Stage::Ingest,
        column: column.to_string(),
        row,
        reason: reason.into(),
    }
}

fn require_amount(value: Option<f64>, column: &str, row: usize) -> crate::Result<f64> {
    let value = value.ok_or_else(|| invalid_value(column, row, "value is missing"))?;
    if value < 0.0 || !value.is_finite() {
        return Err(invalid_value(
            column,
            row,
            format!("{value} is not a non-negative number"),
        ));
    }
    Ok(value)
}

fn require_count(value: Option<f64>, column: &str, row: usize) -> crate::Result<i64> {
    let value = require_amount(value, column, row)?;
    if value.fract() != 0.0 {
        return Err(invalid_value(
            column,
            row,
            format!("{value} is not a whole number"),
        ));
    }
    Ok(value as i64)
}

/// Coerce a boolean-like cell: true/false, yes/no, t/f, y/n or a number
fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|x| !x.is_nan())
            .map(|x| x != 0.0),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Customer ID,Gender,Age,City,Membership Type,Total Spend,Items Purchased,Average Rating,Discount Applied,Days Since Last Purchase,Satisfaction Level").unwrap();
        writeln!(file, "101,Female,29,New York,Gold,1120.20,14,4.6,TRUE,25,Satisfied").unwrap();
        writeln!(file, "102,Male,,Los Angeles,Silver,780.50,11,4.1,FALSE,18,Neutral").unwrap();
        writeln!(file, "103,Female,43,,Bronze,510.75,9,3.4,TRUE,42,").unwrap();
        file
    }

    #[test]
    fn test_load_customers_with_spaced_headers() {
        let test_file = create_test_csv();
        let records = load_customers(test_file.path()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].customer_id, 101);
        assert_eq!(records[0].total_spend, 1120.20);
        assert!(records[0].discount_applied);
        assert!(!records[1].discount_applied);
        assert_eq!(records[1].age, None);
        assert_eq!(records[2].city, None);
        assert_eq!(records[2].satisfaction_level, None);
        assert_eq!(records[2].days_since_last_purchase, 42);
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "CustomerID,Age,Gender,City,MembershipType,SatisfactionLevel,ItemsPurchased,DaysSinceLastPurchase,DiscountApplied").unwrap();
        writeln!(file, "1,30,Male,Paris,Gold,Neutral,3,10,0").unwrap();

        let err = load_customers(file.path()).unwrap_err();
        match err {
            PipelineError::MissingColumn { stage, column } => {
                assert_eq!(stage, Stage::Ingest);
                assert_eq!(column, columns::TOTAL_SPEND);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_negative_spend_is_rejected_with_row() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "CustomerID,Age,Gender,City,MembershipType,SatisfactionLevel,TotalSpend,ItemsPurchased,DaysSinceLastPurchase,DiscountApplied").unwrap();
        writeln!(file, "1,30,Male,Paris,Gold,Neutral,100,3,10,0").unwrap();
        writeln!(file, "2,31,Male,Paris,Gold,Neutral,-5,3,10,1").unwrap();

        let err = load_customers(file.path()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidValue { row: 2, ref column, .. } if column == columns::TOTAL_SPEND
        ));
    }

    #[test]
    fn test_non_numeric_age_is_rejected_with_row() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "CustomerID,Age,Gender,City,MembershipType,SatisfactionLevel,TotalSpend,ItemsPurchased,DaysSinceLastPurchase,DiscountApplied").unwrap();
        writeln!(file, "1,30,Male,Paris,Gold,Neutral,100,3,10,0").unwrap();
        writeln!(file, "2,,Male,Paris,Gold,Neutral,120,4,12,1").unwrap();
        writeln!(file, "3,abc,Female,Lyon,Silver,Satisfied,80,2,30,0").unwrap();

        let err = load_customers(file.path()).unwrap_err();
        match err {
            PipelineError::InvalidValue { stage, column, row, reason } => {
                assert_eq!(stage, Stage::Ingest);
                assert_eq!(column, columns::AGE);
                assert_eq!(row, 3);
                assert!(reason.contains("abc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_age_stays_missing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "CustomerID,Age,Gender,City,MembershipType,SatisfactionLevel,TotalSpend,ItemsPurchased,DaysSinceLastPurchase,DiscountApplied").unwrap();
        writeln!(file, "1,30,Male,Paris,Gold,Neutral,100,3,10,0").unwrap();
        writeln!(file, "2,,Male,Paris,Gold,Neutral,120,4,12,1").unwrap();

        let records = load_customers(file.path()).unwrap();
        assert_eq!(records[0].age, Some(30.0));
        assert_eq!(records[1].age, None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("True"), Some(true));
        assert_eq!(parse_flag(" no "), Some(false));
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("0.0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_canonical_name_ignores_case_and_separators() {
        assert_eq!(canonical_name("Customer ID"), canonical_name("CustomerID"));
        assert_eq!(
            canonical_name("days_since_last_purchase"),
            canonical_name(columns::DAYS_SINCE_LAST_PURCHASE)
        );
    }
}
