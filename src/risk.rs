//! Actuarial risk: Gompertz mortality risk ratios and their Gini coefficient.

use log::info;
use polars::prelude::{
    col, lit, DataFrame, DataType, GetOutput, IntoLazy, IntoSeries, PolarsResult, Series,
    Utf8Chunked,
};
use serde::{Deserialize, Serialize};

use crate::config::RiskModel;
use crate::error::{PipelineError, Result};
use crate::records::{self, AGE_ACCEL, AGING_CATEGORY, RISK_RATIO};

const STAGE: &str = "risk";

/// Hazard relative to a subject whose phenotypic and chronological ages agree.
pub fn risk_ratio(age_accel: f64, gompertz_beta: f64) -> f64 {
    (gompertz_beta * age_accel).exp()
}

/// Gini coefficient of a non-negative distribution via its discretized Lorenz curve.
///
/// Values are sorted ascending, accumulated and normalised by the total, giving the
/// Lorenz curve at `x = 1/n, 2/n, ..., 1`. The curve is anchored at the origin and
/// integrated with the trapezoidal rule (step `1/n`); `Gini = 1 - 2 * area`.
pub fn gini(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(PipelineError::InvalidRiskDistribution(
            "no values".to_string(),
        ));
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(PipelineError::InvalidRiskDistribution(format!(
            "{bad} is not a finite non-negative value"
        )));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let cumulative: Vec<f64> = sorted
        .iter()
        .scan(0.0, |total, v| {
            *total += v;
            Some(*total)
        })
        .collect();
    let total = cumulative[cumulative.len() - 1];
    if !(total > 0.0) {
        return Err(PipelineError::InvalidRiskDistribution(
            "values sum to zero".to_string(),
        ));
    }

    let step = 1.0 / sorted.len() as f64;
    let (area, _) = cumulative.iter().fold((0.0, 0.0), |(area, previous), c| {
        let share = c / total;
        (area + step * (previous + share) / 2.0, share)
    });
    Ok((1.0 - 2.0 * area).max(0.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgingCategory {
    Accelerated,
    Normal,
    Decelerated,
}

impl AgingCategory {
    pub fn classify(age_accel: f64, threshold: f64) -> Self {
        if age_accel > threshold {
            AgingCategory::Accelerated
        } else if age_accel < -threshold {
            AgingCategory::Decelerated
        } else {
            AgingCategory::Normal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgingCategory::Accelerated => "Accelerated",
            AgingCategory::Normal => "Normal",
            AgingCategory::Decelerated => "Decelerated",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            AgingCategory::Accelerated,
            AgingCategory::Normal,
            AgingCategory::Decelerated,
        ]
        .into_iter()
        .find(|category| category.as_str() == label)
    }
}

fn categorize(
    threshold: f64,
) -> impl Fn(Series) -> PolarsResult<Option<Series>> + Send + Sync + 'static {
    move |accel| {
        let labels: Utf8Chunked = accel
            .f64()?
            .into_iter()
            .map(|a| a.map(|a| AgingCategory::classify(a, threshold).as_str()))
            .collect();
        Ok(Some(labels.into_series()))
    }
}

/// Appends `Mortality_Risk_Ratio` and `Aging_Category`; returns the run's Gini.
pub fn assess(df: DataFrame, model: &RiskModel) -> Result<(DataFrame, f64)> {
    let df = df
        .lazy()
        .with_columns([
            (lit(model.gompertz_beta) * col(AGE_ACCEL))
                .exp()
                .alias(RISK_RATIO),
            col(AGE_ACCEL)
                .map(
                    categorize(model.category_threshold),
                    GetOutput::from_type(DataType::Utf8),
                )
                .alias(AGING_CATEGORY),
        ])
        .collect()?;

    let ratios = records::f64_values(&df, RISK_RATIO, STAGE)?;
    let gini = gini(&ratios)?;
    info!("Gini coefficient (risk separation): {gini:.3}");
    Ok((df, gini))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use polars::df;
    use polars::prelude::NamedFrom;

    #[test]
    fn each_year_multiplies_risk_by_a_constant() {
        let beta = RiskModel::default().gompertz_beta;
        assert_eq!(risk_ratio(0.0, beta), 1.0);
        assert_abs_diff_eq!(
            risk_ratio(3.0, beta) / risk_ratio(2.0, beta),
            beta.exp(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(risk_ratio(1.0, beta), 1.0960, epsilon = 1e-4);
    }

    #[test]
    fn constant_distribution_has_zero_gini() {
        for n in [1, 2, 7, 1000] {
            assert_abs_diff_eq!(gini(&vec![1.3; n]).unwrap(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn single_outlier_approaches_but_never_reaches_one() {
        let mut values = vec![1.0; 999];
        values.push(1.0e9);
        let g = gini(&values).unwrap();
        assert!(g > 0.99, "gini = {g}");
        assert!(g < 1.0);

        let mut all_in_one = vec![0.0; 99];
        all_in_one.push(5.0);
        let g = gini(&all_in_one).unwrap();
        assert_abs_diff_eq!(g, 1.0 - 1.0 / 100.0, epsilon = 1e-12);
    }

    #[test]
    fn gini_is_scale_invariant() {
        let values: Vec<f64> = (1..=200).map(|i| ((i * 37) % 101) as f64 * 0.07 + 0.2).collect();
        let base = gini(&values).unwrap();
        for factor in [0.001, 2.5, 1.0e6] {
            let scaled: Vec<f64> = values.iter().map(|v| v * factor).collect();
            assert_abs_diff_eq!(gini(&scaled).unwrap(), base, epsilon = 1e-12);
        }
    }

    #[test]
    fn gini_ignores_input_order() {
        let values = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        let mut sorted = values;
        sorted.sort_by(f64::total_cmp);
        assert_eq!(gini(&values).unwrap(), gini(&sorted).unwrap());
    }

    #[test]
    fn two_point_distribution_matches_closed_form() {
        // Lorenz points (0,0), (0.5, 0.25), (1, 1): area = 0.5*(0.125) + 0.5*(0.625) = 0.375.
        assert_abs_diff_eq!(gini(&[1.0, 3.0]).unwrap(), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn undefined_distributions_are_errors() {
        assert!(gini(&[]).is_err());
        assert!(gini(&[0.0, 0.0]).is_err());
        assert!(gini(&[1.0, -0.5]).is_err());
        assert!(gini(&[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn category_labels_parse_back() {
        for category in [
            AgingCategory::Accelerated,
            AgingCategory::Normal,
            AgingCategory::Decelerated,
        ] {
            assert_eq!(AgingCategory::from_label(category.as_str()), Some(category));
        }
        assert_eq!(AgingCategory::from_label("Fast"), None);
    }

    #[test]
    fn categories_use_strict_threshold() {
        assert_eq!(AgingCategory::classify(5.0, 5.0), AgingCategory::Normal);
        assert_eq!(AgingCategory::classify(5.01, 5.0), AgingCategory::Accelerated);
        assert_eq!(AgingCategory::classify(-5.01, 5.0), AgingCategory::Decelerated);
    }

    #[test]
    fn assess_appends_ratio_and_category() {
        let df = df!("AgeAccel" => &[-10.0, 0.0, 10.0]).unwrap();
        let (df, g) = assess(df, &RiskModel::default()).unwrap();
        let ratios = records::f64_values(&df, RISK_RATIO, "test").unwrap();
        assert_eq!(ratios[1], 1.0);
        assert_abs_diff_eq!(ratios[2], risk_ratio(10.0, 0.09165), epsilon = 1e-12);
        assert!(ratios[0] < 1.0 && ratios[2] > 1.0);
        assert!(g > 0.0 && g < 0.5);

        let categories: Vec<Option<&str>> = df
            .column(AGING_CATEGORY)
            .unwrap()
            .utf8()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(
            categories,
            vec![Some("Decelerated"), Some("Normal"), Some("Accelerated")]
        );
    }
}
