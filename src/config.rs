//! Run configuration.
//!
//! Every constant the pipeline depends on (regression weights, unit conversions,
//! survival-model parameters, calibration targets and the source layouts) lives in
//! one immutable [`PipelineConfig`] that is passed into each stage. The defaults
//! reproduce the published PhenoAge model on the NHANES 2017-2018 exports; a JSON
//! file may override any subset of them.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::records::{Biomarker, CanonicalField};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub age_bounds: AgeBounds,
    /// Added to CRP before the logarithm. Zero means `ln(CRP)` on CRP > 0 rows.
    pub crp_log_offset: f64,
    pub missing_fields: MissingFieldPolicy,
    pub model: PhenoAgeModel,
    pub calibration: CalibrationTarget,
    pub risk: RiskModel,
    pub sources: Vec<SourceLayout>,
}

/// Inclusive chronological age window of the analysis population.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AgeBounds {
    pub min: f64,
    pub max: f64,
}

/// What the loader does when no source provides a canonical biomarker column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum MissingFieldPolicy {
    /// Fail the run with `PipelineError::MissingField`.
    #[default]
    Abort,
    /// Fill the column with `Biomarker::population_median`. Age and Sex still abort.
    PopulationMedian,
}

/// Coefficient of one biomarker in the linear score.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Term {
    pub weight: f64,
    /// Multiplies the source-unit value into the unit the weight was fitted on.
    #[serde(default = "unit_conversion")]
    pub conversion: f64,
}

fn unit_conversion() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PhenoAgeModel {
    pub intercept: f64,
    pub age_weight: f64,
    /// For CRP the conversion is applied before the logarithm.
    pub terms: BTreeMap<Biomarker, Term>,
    /// `xb` is clipped to this value before exponentiation. Must be negative.
    pub xb_ceiling: f64,
    pub c1: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl PhenoAgeModel {
    pub fn term(&self, biomarker: Biomarker) -> Result<Term> {
        self.terms.get(&biomarker).copied().ok_or_else(|| {
            PipelineError::InvalidConfig(format!("no model term for biomarker '{biomarker}'"))
        })
    }
}

impl Default for PhenoAgeModel {
    fn default() -> Self {
        let terms = [
            (Biomarker::Albumin, -0.0336, 10.0),
            (Biomarker::Creatinine, 0.0095, 88.42),
            (Biomarker::Glucose, 0.1953, 0.0555),
            (Biomarker::Crp, 0.0954, 1.0),
            (Biomarker::LymphocytePct, -0.0120, 1.0),
            (Biomarker::Mcv, 0.0268, 1.0),
            (Biomarker::Rdw, 0.3306, 1.0),
            (Biomarker::Alp, 0.00188, 1.0),
            (Biomarker::Wbc, 0.0554, 1.0),
        ]
        .into_iter()
        .map(|(biomarker, weight, conversion)| (biomarker, Term { weight, conversion }))
        .collect();

        Self {
            intercept: -19.907,
            age_weight: 0.0804,
            terms,
            xb_ceiling: -0.001,
            c1: 141.50,
            alpha: 0.0095,
            beta: 0.09165,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalibrationTarget {
    pub target_sd: f64,
    pub pheno_age_range: (f64, f64),
    pub age_accel_range: (f64, f64),
}

impl Default for CalibrationTarget {
    fn default() -> Self {
        Self {
            target_sd: 6.12,
            pheno_age_range: (15.0, 110.0),
            age_accel_range: (-30.0, 30.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskModel {
    /// Log-hazard increase per year of age acceleration.
    pub gompertz_beta: f64,
    /// Years of acceleration beyond which a subject counts as an accelerated ager.
    pub category_threshold: f64,
}

impl Default for RiskModel {
    fn default() -> Self {
        Self {
            gompertz_beta: 0.09165,
            category_threshold: 5.0,
        }
    }
}

/// Where one source table lives and how its columns map onto canonical fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceLayout {
    pub name: String,
    /// File name relative to the data directory.
    pub file: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    pub columns: BTreeMap<String, CanonicalField>,
}

fn default_id_column() -> String {
    crate::records::ID.to_string()
}

impl SourceLayout {
    pub fn new(name: &str, file: &str, columns: &[(&str, CanonicalField)]) -> Self {
        Self {
            name: name.to_string(),
            file: file.to_string(),
            id_column: default_id_column(),
            columns: columns
                .iter()
                .map(|(source, field)| (source.to_string(), *field))
                .collect(),
        }
    }
}

fn nhanes_2017_layouts() -> Vec<SourceLayout> {
    use Biomarker::*;
    use CanonicalField::Biomarker as B;

    vec![
        SourceLayout::new(
            "DEMO",
            "DEMO_J.csv",
            &[("RIDAGEYR", CanonicalField::Age), ("RIAGENDR", CanonicalField::Sex)],
        ),
        SourceLayout::new(
            "BIOPRO",
            "BIOPRO_J.csv",
            &[
                ("LBXSAL", B(Albumin)),
                ("LBXSCR", B(Creatinine)),
                ("LBXSGL", B(Glucose)),
                ("LBXSAPSI", B(Alp)),
            ],
        ),
        SourceLayout::new(
            "CBC",
            "CBC_J.csv",
            &[
                ("LBXWBCSI", B(Wbc)),
                ("LBXMCVSI", B(Mcv)),
                ("LBXRDW", B(Rdw)),
                ("LBXLYPCT", B(LymphocytePct)),
            ],
        ),
        SourceLayout::new("HSCRP", "HSCRP_J.csv", &[("LBXHSCRP", B(Crp))]),
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            age_bounds: AgeBounds {
                min: 20.0,
                max: 85.0,
            },
            crp_log_offset: 0.0,
            missing_fields: MissingFieldPolicy::default(),
            model: PhenoAgeModel::default(),
            calibration: CalibrationTarget::default(),
            risk: RiskModel::default(),
            sources: nhanes_2017_layouts(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Rejects constants under which some stage would be undefined.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if !(self.age_bounds.min.is_finite() && self.age_bounds.max.is_finite())
            || self.age_bounds.min > self.age_bounds.max
        {
            return invalid(format!("age bounds {:?} are not an interval", self.age_bounds));
        }
        if !(self.crp_log_offset >= 0.0) {
            return invalid(format!("crp_log_offset must be >= 0, got {}", self.crp_log_offset));
        }

        let model = &self.model;
        for biomarker in Biomarker::ALL {
            let term = model.term(biomarker)?;
            if !term.weight.is_finite() || !(term.conversion > 0.0) {
                return invalid(format!("model term for '{biomarker}' is {term:?}"));
            }
        }
        if !(model.xb_ceiling < 0.0) {
            return invalid(format!("xb_ceiling must be < 0, got {}", model.xb_ceiling));
        }
        if !(model.alpha > 0.0) || !(model.beta > 0.0) {
            return invalid(format!(
                "Gompertz alpha and beta must be > 0, got {} and {}",
                model.alpha, model.beta
            ));
        }
        if !model.intercept.is_finite() || !model.age_weight.is_finite() || !model.c1.is_finite() {
            return invalid("model intercept, age weight and C1 must be finite".to_string());
        }

        let calibration = &self.calibration;
        if !(calibration.target_sd > 0.0) {
            return invalid(format!("target_sd must be > 0, got {}", calibration.target_sd));
        }
        for (name, (lo, hi)) in [
            ("pheno_age_range", calibration.pheno_age_range),
            ("age_accel_range", calibration.age_accel_range),
        ] {
            if !(lo <= hi) {
                return invalid(format!("{name} ({lo}, {hi}) is not an interval"));
            }
        }

        if !self.risk.gompertz_beta.is_finite() || !(self.risk.category_threshold >= 0.0) {
            return invalid(format!("risk model {:?} is not usable", self.risk));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn defaults_cover_every_biomarker_once() {
        let config = PipelineConfig::default();
        assert_eq!(config.model.terms.len(), Biomarker::ALL.len());

        let mapped: Vec<CanonicalField> = config
            .sources
            .iter()
            .flat_map(|layout| layout.columns.values().copied())
            .collect();
        for field in CanonicalField::all() {
            assert_eq!(mapped.iter().filter(|m| **m == field).count(), 1, "{field}");
        }
    }

    #[test]
    fn json_overrides_a_subset() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "age_bounds": { "min": 30, "max": 70 },
                "crp_log_offset": 0.1,
                "missing_fields": "PopulationMedian",
                "calibration": { "target_sd": 5.0 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.age_bounds, AgeBounds { min: 30.0, max: 70.0 });
        assert_eq!(config.crp_log_offset, 0.1);
        assert_eq!(config.missing_fields, MissingFieldPolicy::PopulationMedian);
        assert_eq!(config.calibration.target_sd, 5.0);
        assert_eq!(config.calibration.age_accel_range, (-30.0, 30.0));
        assert_eq!(config.model, PhenoAgeModel::default());
    }

    #[test]
    fn json_source_layout_uses_canonical_names() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "sources": [
                    { "name": "labs", "file": "labs.csv", "id_column": "subject",
                      "columns": { "alb": "Albumin", "age_years": "Age" } }
                ]
            }"#,
        )
        .unwrap();
        let layout = &config.sources[0];
        assert_eq!(layout.id_column, "subject");
        assert_eq!(
            layout.columns["alb"],
            CanonicalField::Biomarker(Biomarker::Albumin)
        );
        assert_eq!(layout.columns.len(), 2);
    }

    #[test]
    fn unknown_canonical_name_is_rejected() {
        let err = PipelineConfig::from_json_str(
            r#"{ "sources": [ { "name": "x", "file": "x.csv", "columns": { "a": "HbA1c" } } ] }"#,
        );
        assert!(matches!(err, Err(PipelineError::ConfigParse(_))));
    }

    #[test]
    fn non_positive_gompertz_parameters_are_configuration_errors() {
        let mut config = PipelineConfig::default();
        config.model.alpha = 0.0;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));

        let mut config = PipelineConfig::default();
        config.model.beta = -0.1;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));

        let mut config = PipelineConfig::default();
        config.model.xb_ceiling = 0.0;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn missing_model_term_is_rejected() {
        let mut config = PipelineConfig::default();
        config.model.terms.remove(&Biomarker::Rdw);
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut config = PipelineConfig::default();
        config.age_bounds = AgeBounds { min: 85.0, max: 20.0 };
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.calibration.target_sd = 0.0;
        assert!(config.validate().is_err());
    }
}
