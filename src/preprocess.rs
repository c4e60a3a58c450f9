//! Biomarker preprocessing: ordered row filtering and the CRP log transform.

use log::{debug, info};
use polars::prelude::{col, lit, DataFrame, Expr, IntoLazy, NamedFrom, Series};
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::records::{self, Biomarker, AGE, CRP_LOG};

/// Row counts through the three filter steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PreprocessReport {
    pub input_rows: usize,
    pub dropped_nonpositive_crp: usize,
    pub dropped_age_range: usize,
    pub dropped_missing: usize,
    pub retained: usize,
}

fn apply_filter(df: DataFrame, predicate: Expr) -> Result<(DataFrame, usize)> {
    let before = df.height();
    let filtered = df.lazy().filter(predicate).collect()?;
    let dropped = before - filtered.height();
    Ok((filtered, dropped))
}

/// Drops rows with CRP <= 0, then rows outside the age bounds, then rows with a
/// null among Age and the nine biomarkers. Each step only removes rows whose own
/// condition fails; nulls pass through to the last step.
pub fn filter_records(df: DataFrame, config: &PipelineConfig) -> Result<(DataFrame, PreprocessReport)> {
    let mut report = PreprocessReport {
        input_rows: df.height(),
        ..Default::default()
    };

    let crp = col(Biomarker::Crp.column());
    let (df, dropped) = apply_filter(df, crp.clone().is_null().or(crp.gt(lit(0.0))))?;
    report.dropped_nonpositive_crp = dropped;

    let age = col(AGE);
    let bounds = config.age_bounds;
    let in_range = age
        .clone()
        .gt_eq(lit(bounds.min))
        .and(age.clone().lt_eq(lit(bounds.max)));
    let (df, dropped) = apply_filter(df, age.is_null().or(in_range))?;
    report.dropped_age_range = dropped;

    let complete = Biomarker::ALL
        .iter()
        .fold(col(AGE).is_not_null(), |acc, b| acc.and(col(b.column()).is_not_null()));
    let (df, dropped) = apply_filter(df, complete)?;
    report.dropped_missing = dropped;

    report.retained = df.height();
    info!(
        "Preprocessing: {} rows in, dropped {} (CRP <= 0), {} (age outside [{}, {}]), {} (missing values); {} valid",
        report.input_rows,
        report.dropped_nonpositive_crp,
        report.dropped_age_range,
        bounds.min,
        bounds.max,
        report.dropped_missing,
        report.retained
    );
    Ok((df, report))
}

/// Appends `CRP_log = ln(conversion * CRP + offset)`.
pub fn add_log_crp(mut df: DataFrame, config: &PipelineConfig) -> Result<DataFrame> {
    let conversion = config.model.term(Biomarker::Crp)?.conversion;
    let offset = config.crp_log_offset;
    let crp = records::f64_values(&df, Biomarker::Crp.column(), "preprocess")?;

    let logged = crp
        .iter()
        .enumerate()
        .map(|(row, &value)| {
            let shifted = conversion * value + offset;
            if shifted > 0.0 {
                Ok(shifted.ln())
            } else {
                Err(PipelineError::DomainViolation {
                    stage: "preprocess",
                    column: Biomarker::Crp.column().to_string(),
                    row,
                    value,
                })
            }
        })
        .collect::<Result<Vec<f64>>>()?;
    debug!("Computed {} for {} rows (offset {})", CRP_LOG, logged.len(), offset);

    df.with_column(Series::new(CRP_LOG, logged))?;
    Ok(df)
}

/// Full preprocessing stage. An empty result is reported as `NoValidRecords`.
pub fn preprocess(df: DataFrame, config: &PipelineConfig) -> Result<(DataFrame, PreprocessReport)> {
    let (df, report) = filter_records(df, config)?;
    if report.retained == 0 {
        return Err(PipelineError::NoValidRecords);
    }
    Ok((add_log_crp(df, config)?, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use polars::df;

    fn frame() -> DataFrame {
        df!(
            "SEQN" => &[1i64, 2, 3, 4, 5, 6, 7],
            "Age" => &[Some(50.0), Some(19.0), Some(40.0), Some(86.0), Some(85.0), None, Some(20.0)],
            "Albumin" => &[Some(4.0); 7],
            "Creatinine" => &[Some(1.0); 7],
            "Glucose" => &[Some(100.0), Some(100.0), Some(100.0), Some(100.0), Some(100.0), Some(100.0), None],
            "CRP" => &[Some(1.0), Some(2.0), Some(0.0), Some(1.0), Some(-3.0), Some(1.5), Some(2.7)],
            "Lymphocyte_Pct" => &[Some(25.0); 7],
            "MCV" => &[Some(90.0); 7],
            "RDW" => &[Some(13.0); 7],
            "ALP" => &[Some(70.0); 7],
            "WBC" => &[Some(6.0); 7]
        )
        .unwrap()
    }

    #[test]
    fn filters_each_rule_in_order() {
        let config = PipelineConfig::default();
        let (filtered, report) = filter_records(frame(), &config).unwrap();

        assert_eq!(
            report,
            PreprocessReport {
                input_rows: 7,
                dropped_nonpositive_crp: 2,
                dropped_age_range: 2,
                dropped_missing: 2,
                retained: 1,
            }
        );
        let ids = records::i64_values(&filtered, "SEQN", "test").unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn age_bounds_are_inclusive() {
        let mut data = frame();
        data.with_column(Series::new("Glucose", &[100.0; 7])).unwrap();
        let (filtered, _) = filter_records(data, &PipelineConfig::default()).unwrap();
        let ids = records::i64_values(&filtered, "SEQN", "test").unwrap();
        assert_eq!(ids, vec![1, 7]);
    }

    #[test]
    fn log_crp_without_offset() {
        let (df, _) = preprocess(frame(), &PipelineConfig::default()).unwrap();
        let logged = records::f64_values(&df, CRP_LOG, "test").unwrap();
        assert_abs_diff_eq!(logged[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn log_crp_with_offset() {
        let mut config = PipelineConfig::default();
        config.crp_log_offset = 0.1;
        let (df, _) = preprocess(frame(), &config).unwrap();
        let logged = records::f64_values(&df, CRP_LOG, "test").unwrap();
        assert_abs_diff_eq!(logged[0], 1.1f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn empty_result_is_reported() {
        let mut config = PipelineConfig::default();
        config.age_bounds.min = 90.0;
        config.age_bounds.max = 95.0;
        assert!(matches!(
            preprocess(frame(), &config),
            Err(PipelineError::NoValidRecords)
        ));
    }
}
