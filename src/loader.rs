//! Record loader: merges keyed source tables into one subject table.
//!
//! Each source contributes a handful of named measurements per subject. The loader
//! renames them onto canonical fields through a [`FieldMap`] and keeps only the
//! subjects present in every source (an inner join on the identifier).

use log::{debug, info, warn};
use polars::prelude::{col, DataFrame, DataType, IntoLazy, LazyFrame, NamedFrom, Series, SortOptions};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{MissingFieldPolicy, SourceLayout};
use crate::error::{PipelineError, Result};
use crate::records::{CanonicalField, SubjectRecord, ID};

/// One source file narrowed to its identifier (as `SEQN`, Int64) and the mapped
/// measurement columns it actually has (Float64, under their source names).
#[derive(Debug, Clone)]
pub struct SourceTable {
    name: String,
    frame: DataFrame,
}

impl SourceTable {
    /// Selects the identifier and every mapped column of `layout` present in `df`.
    /// Absent columns are left for the merge policy to handle.
    pub fn from_frame(layout: &SourceLayout, df: &DataFrame) -> Result<Self> {
        let available = df.get_column_names();
        if !available.contains(&layout.id_column.as_str()) {
            return Err(PipelineError::ColumnNotFound {
                table: layout.name.clone(),
                column: layout.id_column.clone(),
            });
        }

        let mut selection = vec![col(&layout.id_column).cast(DataType::Int64).alias(ID)];
        selection.extend(
            layout
                .columns
                .keys()
                .filter(|column| available.contains(&column.as_str()))
                .map(|column| col(column).cast(DataType::Float64)),
        );
        let frame = df.clone().lazy().select(selection).collect()?;

        let table = SourceTable {
            name: layout.name.clone(),
            frame,
        };
        table.check_identifiers()?;
        debug!(
            "Source '{}': {} subjects, columns {:?}",
            table.name,
            table.len(),
            table.columns()
        );
        Ok(table)
    }

    fn check_identifiers(&self) -> Result<()> {
        let ids = self.frame.column(ID)?;
        if let Some(row) = ids.is_null().into_iter().position(|null| null == Some(true)) {
            return Err(PipelineError::NullIdentifier {
                table: self.name.clone(),
                row,
            });
        }

        let duplicated = self.frame.select([ID])?.is_duplicated()?;
        let repeated = ids
            .i64()?
            .into_iter()
            .zip(duplicated.into_iter())
            .find_map(|(id, dup)| if dup == Some(true) { id } else { None });
        match repeated {
            Some(id) => Err(PipelineError::DuplicateIdentifier {
                table: self.name.clone(),
                id,
            }),
            None => Ok(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Measurement columns, without the identifier.
    pub fn columns(&self) -> Vec<&str> {
        self.frame
            .get_column_names()
            .into_iter()
            .filter(|column| *column != ID)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }
}

/// Source column -> canonical field renaming, checked to be injective.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    entries: HashMap<(String, String), CanonicalField>,
    sources: BTreeSet<String>,
}

impl FieldMap {
    pub fn from_layouts(layouts: &[SourceLayout]) -> Result<Self> {
        let mut map = FieldMap::default();
        let mut owners: BTreeMap<CanonicalField, String> = BTreeMap::new();

        for layout in layouts {
            map.sources.insert(layout.name.clone());
            for (column, field) in &layout.columns {
                let owner = format!("{}.{}", layout.name, column);
                if let Some(first) = owners.get(field) {
                    return Err(PipelineError::FieldCollision {
                        field: *field,
                        first: first.clone(),
                        second: owner,
                    });
                }
                owners.insert(*field, owner);
                map.entries
                    .insert((layout.name.clone(), column.clone()), *field);
            }
        }
        Ok(map)
    }

    pub fn resolve(&self, table: &str, column: &str) -> Option<CanonicalField> {
        self.entries
            .get(&(table.to_string(), column.to_string()))
            .copied()
    }

    pub fn knows(&self, table: &str) -> bool {
        self.sources.contains(table)
    }
}

/// The table's identifier plus its mapped columns under their canonical names.
fn canonical(table: &SourceTable, fields: &FieldMap) -> Result<LazyFrame> {
    if !fields.knows(table.name()) {
        return Err(PipelineError::UnknownSource(table.name().to_string()));
    }
    let mut selection = vec![col(ID)];
    for column in table.columns() {
        match fields.resolve(table.name(), column) {
            Some(field) => selection.push(col(column).alias(field.column())),
            None => debug!("Ignoring unmapped column {}.{}", table.name(), column),
        }
    }
    Ok(table.frame().clone().lazy().select(selection))
}

/// Inner-joins `tables` on the identifier and returns the merged subject table,
/// ordered by ascending identifier and conformed to `SubjectRecord::merged_schema`.
pub fn merge_sources(
    tables: &[SourceTable],
    fields: &FieldMap,
    policy: MissingFieldPolicy,
) -> Result<DataFrame> {
    let (first, rest) = tables.split_first().ok_or(PipelineError::NoSources)?;

    let mut joined = canonical(first, fields)?;
    for table in rest {
        joined = joined.inner_join(canonical(table, fields)?, col(ID), col(ID));
    }
    let mut merged = joined.sort(ID, SortOptions::default()).collect()?;
    info!(
        "Merged {} sources: {} subjects present in all of them",
        tables.len(),
        merged.height()
    );

    for field in CanonicalField::all() {
        if merged.get_column_names().contains(&field.column()) {
            continue;
        }
        match (field, policy) {
            (CanonicalField::Biomarker(b), MissingFieldPolicy::PopulationMedian) => {
                warn!(
                    "No source provides '{}'; substituting population median {}",
                    b,
                    b.population_median()
                );
                let filled = vec![b.population_median(); merged.height()];
                merged.with_column(Series::new(b.column(), filled))?;
            }
            _ => return Err(PipelineError::MissingField(field)),
        }
    }

    SubjectRecord::conform(merged)
}
