use polars::prelude::DataFrame;
use serde::Serialize;
use std::fmt;

use crate::error::{PipelineError, Result};
use crate::records::{self, Sex, AGE, AGE_ACCEL, PHENO_AGE, RISK_RATIO};
use crate::risk::AgingCategory;
use crate::stats::{self, ColumnStats};

/// Mean and sample standard deviation of one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Moments {
    pub mean: f64,
    pub sd: f64,
}

impl From<ColumnStats> for Moments {
    fn from(stats: ColumnStats) -> Self {
        Self {
            mean: stats.mean.unwrap_or(f64::NAN),
            sd: stats.sd.unwrap_or(f64::NAN),
        }
    }
}

/// Descriptive statistics of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub sample_size: usize,
    pub age_range: (f64, f64),
    pub female: usize,
    pub male: usize,
    pub age: Moments,
    pub pheno_age: Moments,
    pub age_accel: Moments,
    pub category_threshold: f64,
    pub accelerated: usize,
    pub normal: usize,
    pub decelerated: usize,
    pub risk_ratio_mean: f64,
    pub risk_ratio_range: (f64, f64),
    pub gini: f64,
}

impl Summary {
    pub fn from_frame(df: &DataFrame, gini: f64, category_threshold: f64) -> Result<Self> {
        let stage = "summary";
        let ages = stats::describe(df, AGE)?;
        let ratios = stats::describe(df, RISK_RATIO)?;
        let accel = records::f64_values(df, AGE_ACCEL, stage)?;
        let sexes = records::sex_values(df)?;

        let age_range = ages.range().ok_or(PipelineError::NoValidRecords)?;
        let risk_ratio_range = ratios.range().ok_or(PipelineError::NoValidRecords)?;

        let count = |category: AgingCategory| {
            accel
                .iter()
                .filter(|&&a| AgingCategory::classify(a, category_threshold) == category)
                .count()
        };

        Ok(Self {
            sample_size: df.height(),
            age_range,
            female: sexes.iter().filter(|s| **s == Sex::Female).count(),
            male: sexes.iter().filter(|s| **s == Sex::Male).count(),
            age: ages.into(),
            pheno_age: stats::describe(df, PHENO_AGE)?.into(),
            age_accel: stats::describe(df, AGE_ACCEL)?.into(),
            category_threshold,
            accelerated: count(AgingCategory::Accelerated),
            normal: count(AgingCategory::Normal),
            decelerated: count(AgingCategory::Decelerated),
            risk_ratio_mean: ratios.mean.unwrap_or(f64::NAN),
            risk_ratio_range,
            gini,
        })
    }

    fn percent(&self, count: usize) -> f64 {
        100.0 * count as f64 / self.sample_size as f64
    }

    /// Flat `(metric, value)` rows for the summary export.
    pub fn rows(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("sample_size", self.sample_size as f64),
            ("age_min", self.age_range.0),
            ("age_max", self.age_range.1),
            ("female_pct", self.percent(self.female)),
            ("male_pct", self.percent(self.male)),
            ("age_mean", self.age.mean),
            ("age_sd", self.age.sd),
            ("pheno_age_mean", self.pheno_age.mean),
            ("pheno_age_sd", self.pheno_age.sd),
            ("age_accel_mean", self.age_accel.mean),
            ("age_accel_sd", self.age_accel.sd),
            ("accelerated", self.accelerated as f64),
            ("normal", self.normal as f64),
            ("decelerated", self.decelerated as f64),
            ("risk_ratio_mean", self.risk_ratio_mean),
            ("risk_ratio_min", self.risk_ratio_range.0),
            ("risk_ratio_max", self.risk_ratio_range.1),
            ("gini", self.gini),
        ]
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.category_threshold;
        writeln!(f, "[Sample Characteristics]")?;
        writeln!(f, "  Sample Size: N = {}", self.sample_size)?;
        writeln!(
            f,
            "  Age Range: {:.0} - {:.0} years",
            self.age_range.0, self.age_range.1
        )?;
        writeln!(
            f,
            "  Sex: {:.1}% Female, {:.1}% Male",
            self.percent(self.female),
            self.percent(self.male)
        )?;
        writeln!(f, "[Age Metrics]")?;
        writeln!(
            f,
            "  Mean Chronological Age: {:.1} years (SD: {:.1})",
            self.age.mean, self.age.sd
        )?;
        writeln!(
            f,
            "  Mean Phenotypic Age: {:.1} years (SD: {:.1})",
            self.pheno_age.mean, self.pheno_age.sd
        )?;
        writeln!(
            f,
            "  Mean Age Acceleration: {:.2} years (SD: {:.2})",
            self.age_accel.mean, self.age_accel.sd
        )?;
        writeln!(f, "[Aging Categories]")?;
        writeln!(
            f,
            "  Accelerated (> {t} years): {} ({:.1}%)",
            self.accelerated,
            self.percent(self.accelerated)
        )?;
        writeln!(
            f,
            "  Normal (-{t} to +{t} years): {} ({:.1}%)",
            self.normal,
            self.percent(self.normal)
        )?;
        writeln!(
            f,
            "  Decelerated (< -{t} years): {} ({:.1}%)",
            self.decelerated,
            self.percent(self.decelerated)
        )?;
        writeln!(f, "[Actuarial Metrics]")?;
        writeln!(f, "  Mean Risk Ratio: {:.2}", self.risk_ratio_mean)?;
        writeln!(
            f,
            "  Risk Ratio Range: {:.2} - {:.2}",
            self.risk_ratio_range.0, self.risk_ratio_range.1
        )?;
        write!(f, "  Gini Coefficient: {:.3}", self.gini)
    }
}
