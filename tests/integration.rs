//! Integration tests for RetainForge

use retainforge::pipeline::{self, MANIFEST_FILE, SEGMENTED_CUSTOMERS_FILE};
use retainforge::{load_customers, Pipeline, PipelineConfig, PipelineError, Stage};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

const HEADER: &str = "Customer ID,Gender,Age,City,Membership Type,Total Spend,Items Purchased,Average Rating,Discount Applied,Days Since Last Purchase,Satisfaction Level";

/// Create a test CSV with four behavioral groups, one duplicate and a few gaps
fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();

    // Customer 1 bought nothing countable but spent recently
    writeln!(file, "1,Female,30,New York,Gold,100.00,0,4.5,TRUE,10,Satisfied").unwrap();

    let cities = ["new york", "Los Angeles", "chicago", "Houston"];
    let memberships = ["silver", "Gold", "platinum", ""];
    let satisfaction = ["unsatisfied", "Neutral", "satisfied", ""];
    let spend = [60.0, 450.0, 1300.0, 2400.0];
    let items = [2, 6, 12, 20];
    let days = [85, 50, 22, 4];

    for id in 2..=32 {
        let g = (id % 4) as usize;
        let age = if id % 7 == 0 {
            String::new()
        } else {
            (22 + (id * 5) % 35).to_string()
        };
        let city = if id % 11 == 0 { "" } else { cities[g] };
        writeln!(
            file,
            "{id},{},{age},{city},{},{:.2},{},4.0,{},{},{}",
            if id % 2 == 0 { "Male" } else { "Female" },
            memberships[g],
            spend[g] + 4.5 * id as f64,
            items[g] + id / 8,
            if id % 3 == 0 { "TRUE" } else { "FALSE" },
            days[g] + id % 5,
            satisfaction[g],
        )
        .unwrap();
    }

    // Second row for customer 5 must be ignored
    writeln!(file, "5,Male,70,Boston,Platinum,9999.00,99,1.0,TRUE,1,Satisfied").unwrap();

    file
}

fn default_pipeline() -> Pipeline {
    Pipeline::new(PipelineConfig::default()).unwrap()
}

#[test]
fn test_end_to_end_pipeline() {
    let test_file = create_test_csv();
    let output = default_pipeline().run_file(test_file.path()).unwrap();

    // 32 unique customers after dropping the duplicate
    assert_eq!(output.customers.len(), 32);
    assert_eq!(output.matrix.features.shape(), &[32, 6]);
    assert_eq!(output.model.n_clusters, 4);

    // Imputed columns are complete
    for c in &output.customers {
        let record = &c.customer.record;
        assert!(record.age.is_finite());
        assert!(!record.city.is_empty());
        assert!(!record.membership_type.is_empty());
        assert!(!record.satisfaction_level.is_empty());
        if let Some(loyalty) = c.customer.features.loyalty_score {
            assert!((0.0..=1.0).contains(&loyalty));
        }
        assert!(c.segment < 4);
    }

    // Summary invariants
    let total: usize = output.summaries.iter().map(|s| s.cluster_size).sum();
    assert_eq!(total, 32);
    let pct: f64 = output.summaries.iter().map(|s| s.cluster_percentage).sum();
    assert!((pct - 100.0).abs() <= 0.02);

    // Inertia sweep covers every candidate
    let ks: Vec<usize> = output.inertia_curve.points.iter().map(|p| p.k).collect();
    assert_eq!(ks, (2..=9).collect::<Vec<_>>());
}

#[test]
fn test_example_customer_features() {
    let test_file = create_test_csv();
    let output = default_pipeline().run_file(test_file.path()).unwrap();

    let first = output
        .customers
        .iter()
        .find(|c| c.customer.record.customer_id == 1)
        .unwrap();
    let f = &first.customer.features;
    assert_eq!(f.avg_spend_per_item, None);
    assert_eq!(f.satisfaction_encoded, 3);
    assert_eq!(f.membership_encoded, 2);
    assert!(f.recent_buyer);
}

#[test]
fn test_duplicate_customer_keeps_first_row() {
    let test_file = create_test_csv();
    let raw = load_customers(test_file.path()).unwrap();
    assert_eq!(raw.len(), 33);

    let output = default_pipeline().run(raw).unwrap();
    let fifth: Vec<_> = output
        .customers
        .iter()
        .filter(|c| c.customer.record.customer_id == 5)
        .collect();
    assert_eq!(fifth.len(), 1);
    assert_eq!(fifth[0].customer.record.total_spend, 450.0 + 4.5 * 5.0);
    assert_ne!(fifth[0].customer.record.city, "Boston");
}

#[test]
fn test_text_is_normalized_and_gaps_filled() {
    let test_file = create_test_csv();
    let output = default_pipeline().run_file(test_file.path()).unwrap();

    let by_id = |id: i64| {
        output
            .customers
            .iter()
            .find(|c| c.customer.record.customer_id == id)
            .map(|c| &c.customer.record)
            .unwrap()
    };
    // Group 0 rows carry lowercase text
    assert_eq!(by_id(4).city, "New York");
    assert_eq!(by_id(4).membership_type, "Silver");
    assert_eq!(by_id(4).satisfaction_level, "Unsatisfied");
    // Group 3 rows have no membership or satisfaction
    assert_eq!(by_id(3).membership_type, "Unknown");
    assert_eq!(by_id(3).satisfaction_level, "Neutral");
}

#[test]
fn test_deterministic_segments() {
    let test_file = create_test_csv();
    let pipeline = default_pipeline();
    let first = pipeline.run_file(test_file.path()).unwrap();
    let second = pipeline.run_file(test_file.path()).unwrap();

    assert_eq!(first.model.labels, second.model.labels);
    assert_eq!(first.inertia_curve, second.inertia_curve);
    assert_eq!(first.summaries, second.summaries);
}

#[test]
fn test_missing_column_aborts() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "CustomerID,Age,Gender,City,MembershipType,SatisfactionLevel,TotalSpend,ItemsPurchased,DiscountApplied").unwrap();
    writeln!(file, "1,30,Male,Paris,Gold,Neutral,100,3,0").unwrap();

    let err = default_pipeline().run_file(file.path()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingColumn { stage: Stage::Ingest, ref column } if column == "DaysSinceLastPurchase"
    ));
}

#[test]
fn test_identical_customers_cannot_form_four_segments() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for id in 1..=10 {
        writeln!(file, "{id},Male,40,Denver,Gold,300.00,5,4.0,FALSE,12,Neutral").unwrap();
    }

    let err = default_pipeline().run_file(file.path()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Configuration { stage: Stage::Segment, .. }
    ));
}

#[test]
fn test_artifacts_written() {
    let test_file = create_test_csv();
    let output = default_pipeline().run_file(test_file.path()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let paths = pipeline::write_artifacts(&output, dir.path()).unwrap();

    let segmented = fs::read_to_string(dir.path().join(SEGMENTED_CUSTOMERS_FILE)).unwrap();
    let mut lines = segmented.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("CustomerID,"));
    assert!(header.ends_with("CustomerSegment"));
    assert_eq!(lines.count(), 32);

    let model_input = fs::read_to_string(&paths.model_input).unwrap();
    assert!(model_input.lines().next().unwrap().ends_with("Churn"));

    let projection = fs::read_to_string(paths.projection.unwrap()).unwrap();
    assert_eq!(
        projection.lines().next().unwrap(),
        "CustomerID,CustomerSegment,PC1,PC2"
    );

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap())
            .unwrap();
    assert_eq!(manifest["n_clusters"], 4);
    assert_eq!(manifest["cluster_sizes"].as_array().unwrap().len(), 4);
}

#[test]
fn test_config_file_overrides() {
    let mut config_file = NamedTempFile::new().unwrap();
    writeln!(config_file, "[clustering]\nn_clusters = 3\nk_max = 5\n").unwrap();
    let config = PipelineConfig::load(config_file.path()).unwrap();

    let test_file = create_test_csv();
    let output = Pipeline::new(config).unwrap().run_file(test_file.path()).unwrap();
    assert_eq!(output.model.n_clusters, 3);
    assert_eq!(output.inertia_curve.points.len(), 4);
    assert_eq!(output.model.cluster_sizes().len(), 3);
    assert!(output.summaries.len() <= 3);
}
