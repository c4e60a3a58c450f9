use polars::prelude::{col, lit, when, DataFrame, DataType, Expr, Field, IntoLazy, Schema, Series};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::risk::AgingCategory;

/// Subject identifier shared by every source table.
pub const ID: &str = "SEQN";
pub const AGE: &str = "Age";
/// Survey sex code (1 = male, 2 = female).
pub const SEX: &str = "Sex";
pub const SEX_LABEL: &str = "Sex_Label";

pub const CRP_LOG: &str = "CRP_log";
pub const XB: &str = "xb";
pub const PHENO_AGE_RAW: &str = "PhenoAge_raw";
pub const PHENO_AGE: &str = "PhenoAge";
pub const AGE_ACCEL: &str = "AgeAccel";
pub const RISK_RATIO: &str = "Mortality_Risk_Ratio";
pub const AGING_CATEGORY: &str = "Aging_Category";

/// The nine clinical measurements entering the phenotypic age score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Biomarker {
    /// g/dL
    Albumin,
    /// mg/dL
    Creatinine,
    /// mg/dL
    Glucose,
    /// C-reactive protein, mg/L
    #[serde(rename = "CRP")]
    Crp,
    #[serde(rename = "Lymphocyte_Pct")]
    LymphocytePct,
    /// Mean corpuscular volume, fL
    #[serde(rename = "MCV")]
    Mcv,
    /// Red-cell distribution width, %
    #[serde(rename = "RDW")]
    Rdw,
    /// Alkaline phosphatase, U/L
    #[serde(rename = "ALP")]
    Alp,
    /// White-blood-cell count, 1000 cells/uL
    #[serde(rename = "WBC")]
    Wbc,
}

impl Biomarker {
    pub const ALL: [Biomarker; 9] = [
        Biomarker::Albumin,
        Biomarker::Creatinine,
        Biomarker::Glucose,
        Biomarker::Crp,
        Biomarker::LymphocytePct,
        Biomarker::Mcv,
        Biomarker::Rdw,
        Biomarker::Alp,
        Biomarker::Wbc,
    ];

    /// Canonical column name of the measurement in every merged table.
    pub fn column(self) -> &'static str {
        match self {
            Biomarker::Albumin => "Albumin",
            Biomarker::Creatinine => "Creatinine",
            Biomarker::Glucose => "Glucose",
            Biomarker::Crp => "CRP",
            Biomarker::LymphocytePct => "Lymphocyte_Pct",
            Biomarker::Mcv => "MCV",
            Biomarker::Rdw => "RDW",
            Biomarker::Alp => "ALP",
            Biomarker::Wbc => "WBC",
        }
    }

    /// Adult population medians (NHANES 2017-2018, source units) used when the
    /// `PopulationMedian` policy substitutes an absent column. CRP keeps the
    /// 0.5 mg/L low-risk proxy.
    pub fn population_median(self) -> f64 {
        match self {
            Biomarker::Albumin => 4.1,
            Biomarker::Creatinine => 0.86,
            Biomarker::Glucose => 99.0,
            Biomarker::Crp => 0.5,
            Biomarker::LymphocytePct => 29.8,
            Biomarker::Mcv => 89.6,
            Biomarker::Rdw => 13.4,
            Biomarker::Alp => 75.0,
            Biomarker::Wbc => 7.0,
        }
    }
}

impl fmt::Display for Biomarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// A column of the merged subject table that a source field can be renamed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CanonicalField {
    Age,
    Sex,
    Biomarker(Biomarker),
}

impl CanonicalField {
    /// Every canonical field, in merged-table column order.
    pub fn all() -> impl Iterator<Item = CanonicalField> {
        [CanonicalField::Age, CanonicalField::Sex]
            .into_iter()
            .chain(Biomarker::ALL.into_iter().map(CanonicalField::Biomarker))
    }

    pub fn column(self) -> &'static str {
        match self {
            CanonicalField::Age => AGE,
            CanonicalField::Sex => SEX,
            CanonicalField::Biomarker(b) => b.column(),
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for CanonicalField {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        CanonicalField::all()
            .find(|field| field.column() == s)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("unknown canonical field '{s}'")))
    }
}

impl TryFrom<String> for CanonicalField {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CanonicalField> for String {
    fn from(field: CanonicalField) -> Self {
        field.column().to_string()
    }
}

/// Categorical sex, decoded from the survey's numeric coding (1 = male, 2 = female).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

impl Sex {
    pub const MALE_CODE: i64 = 1;
    pub const FEMALE_CODE: i64 = 2;

    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(Self::MALE_CODE) => Sex::Male,
            Some(Self::FEMALE_CODE) => Sex::Female,
            _ => Sex::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sex::Male => "Male",
            Sex::Female => "Female",
            Sex::Unknown => "Unknown",
        }
    }
}

/// Decodes a sex-code column into `Sex` labels, with `Unknown` for nulls and
/// unrecognised codes.
fn sex_label(code: Expr) -> Expr {
    let code = code.cast(DataType::Int64);
    when(code.clone().eq(lit(Sex::MALE_CODE)))
        .then(lit(Sex::Male.as_str()))
        .when(code.eq(lit(Sex::FEMALE_CODE)))
        .then(lit(Sex::Female.as_str()))
        .otherwise(lit(Sex::Unknown.as_str()))
}

/// One merged subject row, as produced by the loader.
pub struct SubjectRecord {}

impl SubjectRecord {
    /// Canonical column names of the merged table, in order.
    pub fn columns() -> impl Iterator<Item = &'static str> {
        [ID, SEX, AGE]
            .into_iter()
            .chain(Biomarker::ALL.iter().map(|b| b.column()))
    }

    pub fn merged_schema() -> Schema {
        Schema::from_iter(Self::columns().map(|name| {
            let dtype = match name {
                ID | SEX => DataType::Int64,
                _ => DataType::Float64,
            };
            Field::new(name, dtype)
        }))
    }

    /// Checks that a merged table carries every canonical column.
    pub fn check_frame(df: &DataFrame) -> Result<()> {
        let present = df.get_column_names();
        match Self::columns().find(|name| !present.contains(name)) {
            Some(missing) => Err(PipelineError::ColumnNotFound {
                table: "merged".to_string(),
                column: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Casts every canonical column to its merged dtype, adds `Sex_Label` after the
    /// survey code and drops anything else.
    pub fn conform(df: DataFrame) -> Result<DataFrame> {
        Self::check_frame(&df)?;
        let schema = Self::merged_schema();
        let mut selection = Vec::with_capacity(schema.len() + 1);
        for field in schema.iter_fields() {
            let name = field.name().as_str();
            selection.push(col(name).cast(field.data_type().clone()));
            if name == SEX {
                selection.push(sex_label(col(SEX)).alias(SEX_LABEL));
            }
        }
        Ok(df.lazy().select(selection).collect()?)
    }
}

/// One fully scored subject, field for field the columns of the output table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedRecord {
    #[serde(rename = "SEQN")]
    pub id: i64,
    #[serde(rename = "Sex")]
    pub sex_code: Option<i64>,
    #[serde(rename = "Sex_Label")]
    pub sex: Sex,
    #[serde(rename = "Age")]
    pub age: f64,
    #[serde(rename = "Albumin")]
    pub albumin: f64,
    #[serde(rename = "Creatinine")]
    pub creatinine: f64,
    #[serde(rename = "Glucose")]
    pub glucose: f64,
    #[serde(rename = "CRP")]
    pub crp: f64,
    #[serde(rename = "Lymphocyte_Pct")]
    pub lymphocyte_pct: f64,
    #[serde(rename = "MCV")]
    pub mcv: f64,
    #[serde(rename = "RDW")]
    pub rdw: f64,
    #[serde(rename = "ALP")]
    pub alp: f64,
    #[serde(rename = "WBC")]
    pub wbc: f64,
    #[serde(rename = "CRP_log")]
    pub crp_log: f64,
    pub xb: f64,
    #[serde(rename = "PhenoAge_raw")]
    pub pheno_age_raw: f64,
    #[serde(rename = "AgeAccel")]
    pub age_accel: f64,
    #[serde(rename = "PhenoAge")]
    pub pheno_age: f64,
    #[serde(rename = "Mortality_Risk_Ratio")]
    pub risk_ratio: f64,
    #[serde(rename = "Aging_Category")]
    pub aging_category: AgingCategory,
}

impl DerivedRecord {
    pub fn biomarker(&self, biomarker: Biomarker) -> f64 {
        match biomarker {
            Biomarker::Albumin => self.albumin,
            Biomarker::Creatinine => self.creatinine,
            Biomarker::Glucose => self.glucose,
            Biomarker::Crp => self.crp,
            Biomarker::LymphocytePct => self.lymphocyte_pct,
            Biomarker::Mcv => self.mcv,
            Biomarker::Rdw => self.rdw,
            Biomarker::Alp => self.alp,
            Biomarker::Wbc => self.wbc,
        }
    }
}

fn column_of<'a>(df: &'a DataFrame, column: &str, stage: &'static str) -> Result<&'a Series> {
    df.column(column).map_err(|_| PipelineError::ColumnNotFound {
        table: stage.to_string(),
        column: column.to_string(),
    })
}

/// Reads a numeric column as `f64`, failing on the first null or non-finite value.
pub(crate) fn f64_values(df: &DataFrame, column: &str, stage: &'static str) -> Result<Vec<f64>> {
    let series = column_of(df, column, stage)?.cast(&DataType::Float64)?;
    let values = series
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(v) if v.is_finite() => Ok(v),
            Some(v) => Err(PipelineError::DomainViolation {
                stage,
                column: column.to_string(),
                row,
                value: v,
            }),
            None => Err(PipelineError::NullValue {
                column: column.to_string(),
                row,
            }),
        })
        .collect();
    values
}

/// Fails on the first null or non-finite value of `column`.
pub(crate) fn ensure_finite(df: &DataFrame, column: &str, stage: &'static str) -> Result<()> {
    f64_values(df, column, stage).map(|_| ())
}

pub(crate) fn i64_values(df: &DataFrame, column: &str, stage: &'static str) -> Result<Vec<i64>> {
    let series = column_of(df, column, stage)?.cast(&DataType::Int64)?;
    let values = series
        .i64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.ok_or_else(|| PipelineError::NullValue {
                column: column.to_string(),
                row,
            })
        })
        .collect();
    values
}

pub(crate) fn sex_codes(df: &DataFrame) -> Result<Vec<Option<i64>>> {
    let series = column_of(df, SEX, "merged")?.cast(&DataType::Int64)?;
    let codes: Vec<Option<i64>> = series.i64()?.into_iter().collect();
    Ok(codes)
}

pub(crate) fn sex_values(df: &DataFrame) -> Result<Vec<Sex>> {
    Ok(sex_codes(df)?.into_iter().map(Sex::from_code).collect())
}
