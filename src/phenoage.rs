//! PhenoAge scorer.
//!
//! The linear score `xb` is a weighted sum of the nine biomarkers (converted into
//! the units the weights were fitted on), chronological age and an intercept. It is
//! mapped to an age through the inverse of the Gompertz mortality model:
//!
//! ```text
//! PhenoAge_raw = C1 + ln(-ln(1 - e^xb) / alpha) / beta
//! ```
//!
//! with `xb` clipped below zero first so that `1 - e^xb` stays positive.

use log::debug;
use polars::prelude::{
    col, lit, DataFrame, DataType, Expr, GetOutput, IntoLazy, NamedFrom, PolarsResult, Series,
};

use crate::config::PhenoAgeModel;
use crate::error::Result;
use crate::records::{self, Biomarker, AGE, CRP_LOG, PHENO_AGE_RAW, XB};

const STAGE: &str = "phenoage";

/// Source column each biomarker term reads. CRP enters through its logarithm,
/// whose unit conversion was applied during preprocessing.
fn input_column(biomarker: Biomarker) -> &'static str {
    match biomarker {
        Biomarker::Crp => CRP_LOG,
        other => other.column(),
    }
}

fn conversion(model: &PhenoAgeModel, biomarker: Biomarker) -> Result<f64> {
    Ok(match biomarker {
        Biomarker::Crp => 1.0,
        other => model.term(other)?.conversion,
    })
}

/// Expression for `xb` over a preprocessed table.
pub fn linear_score(model: &PhenoAgeModel) -> Result<Expr> {
    let mut xb = lit(model.intercept) + lit(model.age_weight) * col(AGE);
    for biomarker in Biomarker::ALL {
        let coefficient = model.term(biomarker)?.weight * conversion(model, biomarker)?;
        xb = xb + lit(coefficient) * col(input_column(biomarker));
    }
    Ok(xb.alias(XB))
}

/// Inverse-Gompertz transform of one linear score.
///
/// `-ln(1 - e^xb)` is evaluated as `-ln_1p(-e^xb)`, which keeps full precision for
/// strongly negative scores.
pub fn phenotypic_age(xb: f64, model: &PhenoAgeModel) -> f64 {
    let clipped = xb.min(model.xb_ceiling);
    let cumulative_hazard = -(-clipped.exp()).ln_1p();
    model.c1 + (cumulative_hazard / model.alpha).ln() / model.beta
}

fn inverse_gompertz(
    model: PhenoAgeModel,
) -> impl Fn(Series) -> PolarsResult<Option<Series>> + Send + Sync + 'static {
    move |xb| {
        let ages: Vec<Option<f64>> = xb
            .f64()?
            .into_iter()
            .map(|score| score.map(|score| phenotypic_age(score, &model)))
            .collect();
        Ok(Some(Series::new(xb.name(), ages)))
    }
}

/// Appends `xb` and `PhenoAge_raw`.
pub fn score(df: DataFrame, model: &PhenoAgeModel) -> Result<DataFrame> {
    let df = df
        .lazy()
        .with_column(linear_score(model)?)
        .with_column(
            col(XB)
                .map(
                    inverse_gompertz(model.clone()),
                    GetOutput::from_type(DataType::Float64),
                )
                .alias(PHENO_AGE_RAW),
        )
        .collect()?;

    records::ensure_finite(&df, XB, STAGE)?;
    records::ensure_finite(&df, PHENO_AGE_RAW, STAGE)?;
    debug!("Scored {} rows", df.height());
    Ok(df)
}
