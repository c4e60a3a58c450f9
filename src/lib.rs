//! Phenotypic age scoring and actuarial risk separation.
//!
//! Source tables from a health survey are merged per subject, filtered, scored with
//! the PhenoAge model, calibrated to a target spread of age acceleration and turned
//! into Gompertz mortality risk ratios whose inequality is summarised by a Gini
//! coefficient. See [`pipeline::run`].

pub mod calibrate;
pub mod config;
pub mod error;
pub mod io;
pub mod loader;
pub mod phenoage;
pub mod pipeline;
pub mod preprocess;
pub mod records;
pub mod risk;
pub mod stats;
pub mod summary;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use loader::SourceTable;
pub use pipeline::{run, run_merged, PipelineOutput};
