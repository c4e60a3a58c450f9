//! The end-to-end run: load -> preprocess -> score -> calibrate -> assess.
//!
//! `run` is a pure function of the source tables and the configuration. The only
//! dataset-wide step is calibration; everything else maps whole columns.

use log::info;
use polars::prelude::DataFrame;

use crate::calibrate::{self, CalibrationStats};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::loader::{self, FieldMap, SourceTable};
use crate::phenoage;
use crate::preprocess::{self, PreprocessReport};
use crate::records::{
    self, Biomarker, DerivedRecord, SubjectRecord, AGE, AGE_ACCEL, AGING_CATEGORY, CRP_LOG, ID,
    PHENO_AGE, PHENO_AGE_RAW, RISK_RATIO, XB,
};
use crate::risk::{self, AgingCategory};
use crate::summary::Summary;

/// Everything a completed run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// One row per surviving subject: merged fields plus every derived column.
    pub frame: DataFrame,
    pub gini: f64,
    pub preprocess: PreprocessReport,
    pub calibration: CalibrationStats,
    pub summary: Summary,
}

fn aging_categories(df: &DataFrame) -> Result<Vec<AgingCategory>> {
    let series = df.column(AGING_CATEGORY)?;
    let categories = series
        .utf8()?
        .into_iter()
        .enumerate()
        .map(|(row, label)| {
            let label = label.unwrap_or_default();
            AgingCategory::from_label(label).ok_or_else(|| PipelineError::UnexpectedLabel {
                column: AGING_CATEGORY.to_string(),
                row,
                label: label.to_string(),
            })
        })
        .collect();
    categories
}

impl PipelineOutput {
    /// Typed view of the output table.
    pub fn records(&self) -> Result<Vec<DerivedRecord>> {
        let df = &self.frame;
        let stage = "records";
        let column = |name: &str| records::f64_values(df, name, stage);

        let ids = records::i64_values(df, ID, stage)?;
        let sex_codes = records::sex_codes(df)?;
        let ages = column(AGE)?;
        let biomarkers = Biomarker::ALL
            .iter()
            .map(|b| column(b.column()))
            .collect::<Result<Vec<_>>>()?;
        let crp_log = column(CRP_LOG)?;
        let xb = column(XB)?;
        let raw = column(PHENO_AGE_RAW)?;
        let accel = column(AGE_ACCEL)?;
        let pheno = column(PHENO_AGE)?;
        let ratios = column(RISK_RATIO)?;
        let categories = aging_categories(df)?;

        Ok((0..df.height())
            .map(|row| {
                let biomarker = |b: Biomarker| biomarkers[b as usize][row];
                DerivedRecord {
                    id: ids[row],
                    sex_code: sex_codes[row],
                    sex: records::Sex::from_code(sex_codes[row]),
                    age: ages[row],
                    albumin: biomarker(Biomarker::Albumin),
                    creatinine: biomarker(Biomarker::Creatinine),
                    glucose: biomarker(Biomarker::Glucose),
                    crp: biomarker(Biomarker::Crp),
                    lymphocyte_pct: biomarker(Biomarker::LymphocytePct),
                    mcv: biomarker(Biomarker::Mcv),
                    rdw: biomarker(Biomarker::Rdw),
                    alp: biomarker(Biomarker::Alp),
                    wbc: biomarker(Biomarker::Wbc),
                    crp_log: crp_log[row],
                    xb: xb[row],
                    pheno_age_raw: raw[row],
                    age_accel: accel[row],
                    pheno_age: pheno[row],
                    risk_ratio: ratios[row],
                    aging_category: categories[row],
                }
            })
            .collect())
    }
}

/// Runs stages 2-5 on an already merged subject table.
pub fn run_merged(merged: DataFrame, config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate()?;
    let merged = SubjectRecord::conform(merged)?;

    let (df, preprocess) = preprocess::preprocess(merged, config)?;
    let df = phenoage::score(df, &config.model)?;
    let (df, calibration) = calibrate::calibrate(df, &config.calibration)?;
    let (frame, gini) = risk::assess(df, &config.risk)?;
    let summary = Summary::from_frame(&frame, gini, config.risk.category_threshold)?;

    info!(
        "Pipeline complete: {} subjects scored, Gini {:.3}",
        frame.height(),
        gini
    );
    Ok(PipelineOutput {
        frame,
        gini,
        preprocess,
        calibration,
        summary,
    })
}

/// Merges `tables` according to the configured source layouts and runs the pipeline.
pub fn run(tables: &[SourceTable], config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate()?;
    let fields = FieldMap::from_layouts(&config.sources)?;
    let merged = loader::merge_sources(tables, &fields, config.missing_fields)?;
    run_merged(merged, config)
}
