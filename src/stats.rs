//! Column statistics shared by the calibration and summary stages, computed with
//! polars aggregations.

use polars::prelude::{col, DataFrame, DataType, IntoLazy};
use serde::Serialize;

use crate::error::{PipelineError, Result};

/// Non-null count, mean, sample standard deviation (ddof = 1) and range of one
/// column. Statistics that are undefined for the column are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColumnStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub sd: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ColumnStats {
    pub fn range(&self) -> Option<(f64, f64)> {
        Some((self.min?, self.max?))
    }

    /// True when every value is the same (or there are none).
    pub fn is_constant(&self) -> bool {
        match self.range() {
            Some((lo, hi)) => lo == hi,
            None => true,
        }
    }
}

fn scalar(frame: &DataFrame, name: &str) -> Result<Option<f64>> {
    let series = frame.column(name)?.cast(&DataType::Float64)?;
    let value = series.f64()?.into_iter().next().flatten();
    Ok(value.filter(|v| !v.is_nan()))
}

pub fn describe(df: &DataFrame, column: &str) -> Result<ColumnStats> {
    let series = df.column(column).map_err(|_| PipelineError::ColumnNotFound {
        table: "stats".to_string(),
        column: column.to_string(),
    })?;
    let count = series.len() - series.null_count();

    let aggregates = df
        .clone()
        .lazy()
        .select([
            col(column).cast(DataType::Float64).mean().alias("mean"),
            col(column).cast(DataType::Float64).std(1).alias("sd"),
            col(column).cast(DataType::Float64).min().alias("min"),
            col(column).cast(DataType::Float64).max().alias("max"),
        ])
        .collect()?;

    Ok(ColumnStats {
        count,
        mean: scalar(&aggregates, "mean")?,
        sd: if count < 2 { None } else { scalar(&aggregates, "sd")? },
        min: scalar(&aggregates, "min")?,
        max: scalar(&aggregates, "max")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use polars::df;
    use polars::prelude::NamedFrom;

    #[test]
    fn sample_sd_uses_bessel_correction() {
        let df = df!("x" => &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        let stats = describe(&df, "x").unwrap();
        assert_eq!(stats.count, 8);
        assert_abs_diff_eq!(stats.mean.unwrap(), 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.sd.unwrap(), (32.0f64 / 7.0).sqrt(), epsilon = 1e-12);
        assert_eq!(stats.range(), Some((2.0, 9.0)));
        assert!(!stats.is_constant());
    }

    #[test]
    fn nulls_are_skipped_and_integers_widen() {
        let df = df!("x" => &[Some(3i64), None, Some(-1), Some(8)]).unwrap();
        let stats = describe(&df, "x").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.range(), Some((-1.0, 8.0)));
    }

    #[test]
    fn degenerate_inputs() {
        let single = df!("x" => &[3.0]).unwrap();
        let stats = describe(&single, "x").unwrap();
        assert_eq!(stats.sd, None);
        assert!(stats.is_constant());

        let repeated = df!("x" => &[0.1, 0.1, 0.1]).unwrap();
        assert!(describe(&repeated, "x").unwrap().is_constant());

        assert!(matches!(
            describe(&single, "y"),
            Err(PipelineError::ColumnNotFound { .. })
        ));
    }
}
