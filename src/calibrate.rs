//! Dataset-level calibration of age acceleration.
//!
//! Raw acceleration (`PhenoAge_raw - Age`) is shifted to zero mean and rescaled to
//! the target standard deviation. Every output row depends on statistics of the
//! whole table, so this runs as two passes: [`CalibrationStats::fit`] over the full
//! column, then [`CalibrationStats::apply`] as a column expression. Clipping to plausible ranges
//! happens only after calibration.

use log::info;
use polars::prelude::{col, lit, AnyValue, DataFrame, Expr, IntoLazy};
use serde::Serialize;

use crate::config::CalibrationTarget;
use crate::error::{PipelineError, Result};
use crate::records::{self, AGE, AGE_ACCEL, PHENO_AGE, PHENO_AGE_RAW};
use crate::stats::{self, ColumnStats};

const STAGE: &str = "calibrate";
const MIN_RECORDS: usize = 2;
const RAW_ACCEL: &str = "AgeAccel_raw";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationStats {
    pub mean_offset: f64,
    /// Sample standard deviation of the raw acceleration.
    pub raw_sd: f64,
    pub target_sd: f64,
}

impl CalibrationStats {
    /// A column whose values are all equal has no spread to rescale, even when
    /// rounding in the mean leaves a tiny nonzero standard deviation.
    pub fn fit(raw_accel: &ColumnStats, target: &CalibrationTarget) -> Result<Self> {
        let insufficient = PipelineError::InsufficientRecords {
            found: raw_accel.count,
            required: MIN_RECORDS,
        };
        if raw_accel.count < MIN_RECORDS {
            return Err(insufficient);
        }
        let (Some(mean_offset), Some(raw_sd)) = (raw_accel.mean, raw_accel.sd) else {
            return Err(insufficient);
        };

        let resolution = f64::EPSILON * mean_offset.abs().max(1.0);
        if raw_accel.is_constant() || !raw_sd.is_finite() || raw_sd <= resolution {
            return Err(PipelineError::DegenerateDistribution {
                stage: STAGE,
                column: AGE_ACCEL,
            });
        }
        Ok(Self {
            mean_offset,
            raw_sd,
            target_sd: target.target_sd,
        })
    }

    pub fn scale(&self) -> f64 {
        self.target_sd / self.raw_sd
    }

    pub fn apply(&self, raw_accel: Expr) -> Expr {
        (raw_accel - lit(self.mean_offset)) * lit(self.scale())
    }
}

fn raw_accel() -> Expr {
    col(PHENO_AGE_RAW) - col(AGE)
}

fn clamp(expr: Expr, (lo, hi): (f64, f64)) -> Expr {
    expr.clip(AnyValue::Float64(lo), AnyValue::Float64(hi))
}

/// Appends calibrated `AgeAccel` and `PhenoAge`, each clamped to its configured range.
/// `PhenoAge` is built from the acceleration before it is clamped.
pub fn calibrate(
    df: DataFrame,
    target: &CalibrationTarget,
) -> Result<(DataFrame, CalibrationStats)> {
    let raw = df
        .clone()
        .lazy()
        .select([raw_accel().alias(RAW_ACCEL)])
        .collect()?;
    let calibration = CalibrationStats::fit(&stats::describe(&raw, RAW_ACCEL)?, target)?;
    info!(
        "Calibration: raw mean offset {:.2} years, raw SD {:.2} years, target SD {:.2}",
        calibration.mean_offset, calibration.raw_sd, calibration.target_sd
    );

    let df = df
        .lazy()
        .with_column(calibration.apply(raw_accel()).alias(AGE_ACCEL))
        .with_columns([
            clamp(col(AGE) + col(AGE_ACCEL), target.pheno_age_range).alias(PHENO_AGE),
            clamp(col(AGE_ACCEL), target.age_accel_range).alias(AGE_ACCEL),
        ])
        .collect()?;

    records::ensure_finite(&df, AGE_ACCEL, STAGE)?;
    records::ensure_finite(&df, PHENO_AGE, STAGE)?;
    Ok((df, calibration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use polars::df;
    use polars::prelude::NamedFrom;

    fn frame(ages: &[f64], raw: &[f64]) -> DataFrame {
        df!("Age" => ages, "PhenoAge_raw" => raw).unwrap()
    }

    #[test]
    fn calibrated_acceleration_has_zero_mean_and_target_sd() {
        let ages: Vec<f64> = (0..50).map(|i| 20.0 + i as f64).collect();
        let raw: Vec<f64> = ages
            .iter()
            .enumerate()
            .map(|(i, a)| a + 30.0 + ((i * 7) % 11) as f64 * 1.3)
            .collect();
        let target = CalibrationTarget::default();
        let (df, calibration) = calibrate(frame(&ages, &raw), &target).unwrap();

        let accel = stats::describe(&df, AGE_ACCEL).unwrap();
        assert_abs_diff_eq!(accel.mean.unwrap(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(accel.sd.unwrap(), 6.12, epsilon = 1e-9);
        assert!(calibration.mean_offset > 30.0);

        let accel = records::f64_values(&df, AGE_ACCEL, "test").unwrap();
        let pheno = records::f64_values(&df, PHENO_AGE, "test").unwrap();
        for ((p, a), age) in pheno.iter().zip(&accel).zip(&ages) {
            assert_abs_diff_eq!(*p, age + a, epsilon = 1e-9);
        }
    }

    #[test]
    fn clipping_happens_after_scaling() {
        let target = CalibrationTarget {
            target_sd: 100.0,
            ..CalibrationTarget::default()
        };
        let ages = [50.0, 50.0, 50.0];
        let raw = [40.0, 50.0, 60.0];
        let (df, _) = calibrate(frame(&ages, &raw), &target).unwrap();

        let accel = records::f64_values(&df, AGE_ACCEL, "test").unwrap();
        assert_eq!(accel, vec![-30.0, 0.0, 30.0]);
        let pheno = records::f64_values(&df, PHENO_AGE, "test").unwrap();
        assert_eq!(pheno, vec![15.0, 50.0, 110.0]);
    }

    #[test]
    fn single_record_cannot_be_calibrated() {
        let result = calibrate(frame(&[50.0], &[55.0]), &CalibrationTarget::default());
        assert!(matches!(
            result,
            Err(PipelineError::InsufficientRecords { found: 1, required: 2 })
        ));
    }

    #[test]
    fn zero_spread_is_rejected() {
        let result = calibrate(
            frame(&[40.0, 60.0], &[45.0, 65.0]),
            &CalibrationTarget::default(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::DegenerateDistribution { .. })
        ));
    }

    #[test]
    fn identical_values_with_inexact_mean_are_rejected() {
        // 0.1 has no exact binary form, so the mean of the copies can land one ulp
        // away and leave a standard deviation around 1e-17.
        let raw = df!("x" => &[0.1, 0.1, 0.1]).unwrap();
        let result = CalibrationStats::fit(
            &stats::describe(&raw, "x").unwrap(),
            &CalibrationTarget::default(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::DegenerateDistribution { .. })
        ));

        let result = calibrate(
            frame(&[40.0; 3], &[40.1; 3]),
            &CalibrationTarget::default(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::DegenerateDistribution { .. })
        ));
    }

    #[test]
    fn spread_far_below_the_mean_resolution_is_rejected() {
        let stats = ColumnStats {
            count: 3,
            mean: Some(1.0e6),
            sd: Some(1.0e-12),
            min: Some(1.0e6 - 1.0e-9),
            max: Some(1.0e6 + 1.0e-9),
        };
        assert!(matches!(
            CalibrationStats::fit(&stats, &CalibrationTarget::default()),
            Err(PipelineError::DegenerateDistribution { .. })
        ));
    }
}
