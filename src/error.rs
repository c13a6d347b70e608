//! Error taxonomy for the segmentation pipeline

use std::fmt;

use thiserror::Error;

/// Pipeline stage an error originated in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Clean,
    Derive,
    Segment,
    Report,
    Project,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingest => "ingest",
            Stage::Clean => "clean",
            Stage::Derive => "derive",
            Stage::Segment => "segment",
            Stage::Report => "report",
            Stage::Project => "project",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

/// Errors raised by the library. Every fatal variant names its stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} stage: required column `{column}` is missing from the input")]
    MissingColumn { stage: Stage, column: String },

    #[error("{stage} stage: invalid value in column `{column}` at row {row}: {reason}")]
    InvalidValue {
        stage: Stage,
        column: String,
        row: usize,
        reason: String,
    },

    #[error("{stage} stage: input contains no customer records")]
    EmptyInput { stage: Stage },

    #[error("{stage} stage: configuration error: {message}")]
    Configuration { stage: Stage, message: String },

    #[error("clustering failed: {0}")]
    Clustering(#[from] linfa_clustering::KMeansError),

    #[error("table operation failed: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("matrix shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub(crate) fn config(stage: Stage, message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            stage,
            message: message.into(),
        }
    }

    pub(crate) fn missing_column(stage: Stage, column: &str) -> Self {
        PipelineError::MissingColumn {
            stage,
            column: column.to_string(),
        }
    }

    /// Stage the error is attributed to, if it carries one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::MissingColumn { stage, .. }
            | PipelineError::InvalidValue { stage, .. }
            | PipelineError::EmptyInput { stage }
            | PipelineError::Configuration { stage, .. } => Some(*stage),
            PipelineError::Clustering(_) => Some(Stage::Segment),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_identify_stage_and_column() {
        let err = PipelineError::missing_column(Stage::Ingest, "TotalSpend");
        assert_eq!(
            err.to_string(),
            "ingest stage: required column `TotalSpend` is missing from the input"
        );
        assert_eq!(err.stage(), Some(Stage::Ingest));
    }

    #[test]
    fn wrapped_io_errors_have_no_stage() {
        let err = PipelineError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.stage().is_none());
    }
}
