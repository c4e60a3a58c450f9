use polars::prelude::PolarsError;
use thiserror::Error;

use crate::records::CanonicalField;

/// Every way a pipeline run can fail. A run either completes or returns one of these.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Error from the underlying Polars library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no source tables were supplied")]
    NoSources,
    #[error("source table '{0}' has no configured layout")]
    UnknownSource(String),
    #[error("the required column '{column}' was not found in '{table}'")]
    ColumnNotFound { table: String, column: String },
    #[error("identifier {id} appears more than once in table '{table}'")]
    DuplicateIdentifier { table: String, id: i64 },
    #[error("row {row} of table '{table}' has no identifier")]
    NullIdentifier { table: String, row: usize },
    #[error("canonical field '{field}' is mapped from both '{first}' and '{second}'")]
    FieldCollision {
        field: CanonicalField,
        first: String,
        second: String,
    },
    #[error("required field '{0}' is absent after merging all sources")]
    MissingField(CanonicalField),

    #[error("no valid records remain after preprocessing")]
    NoValidRecords,
    #[error("calibration needs at least {required} records but only {found} were supplied")]
    InsufficientRecords { found: usize, required: usize },
    #[error("column '{column}' has zero spread in stage '{stage}'")]
    DegenerateDistribution {
        stage: &'static str,
        column: &'static str,
    },
    #[error("null value in column '{column}' at row {row}")]
    NullValue { column: String, row: usize },
    #[error("value {value} in column '{column}' at row {row} is outside the domain of stage '{stage}'")]
    DomainViolation {
        stage: &'static str,
        column: String,
        row: usize,
        value: f64,
    },
    #[error("unexpected label '{label}' in column '{column}' at row {row}")]
    UnexpectedLabel {
        column: String,
        row: usize,
        label: String,
    },
    #[error("risk distribution cannot be summarised: {0}")]
    InvalidRiskDistribution(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
