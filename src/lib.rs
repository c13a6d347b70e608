//! RetainForge: customer retention feature engineering and K-Means segmentation
//!
//! The pipeline cleans raw customer records, derives behavioral features
//! (encodings, spend ratios, RFM and loyalty scores), groups customers into
//! segments with seeded K-Means and summarizes every segment.

pub mod clean;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod projection;
pub mod report;
pub mod scale;
pub mod stats;
pub mod training;

// Re-export public items for easier access
pub use clean::Cleaner;
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{load_customers, CustomerRecord, RawCustomerRecord};
pub use error::{PipelineError, Stage};
pub use features::{DerivedFeatures, EnrichedCustomer, FeatureDeriver};
pub use model::{InertiaCurve, SegmentMatrix, SegmentModel, SegmentedCustomer, Segmenter};
pub use pipeline::{write_artifacts, Pipeline, PipelineOutput};
pub use report::{summarize, ClusterSummary};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, PipelineError>;
