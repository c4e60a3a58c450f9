use log::info;
use polars::frame::DataFrame;
use polars::prelude::*;
use polars_io::parquet::{ParquetReader, ParquetWriter};
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::config::SourceLayout;
use crate::error::{PipelineError, Result};
use crate::loader::SourceTable;
use crate::summary::Summary;

pub async fn read_parquet<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let file = File::open(path)?;

    Ok(ParquetReader::new(file).finish()?)
}

/// Reads a headed CSV file. Column types are inferred from every row, so a float
/// appearing late in an integer-looking column still parses.
pub async fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let file = File::open(path)?;

    Ok(CsvReader::new(file)
        .has_header(true)
        .infer_schema(None)
        .finish()?)
}

pub async fn write_csv<P: AsRef<Path>>(path: P, df: &mut DataFrame) -> Result<()> {
    let mut file = File::create(path)?;

    CsvWriter::new(&mut file).has_header(true).finish(df)?;

    Ok(())
}

pub async fn write_parquet<P: AsRef<Path>>(path: P, df: &mut DataFrame) -> Result<()> {
    let mut file = File::create(path)?;

    ParquetWriter::new(&mut file).finish(df)?;

    Ok(())
}

/// Reads one source file from `data_dir`, as Parquet when the file name says so
/// and as CSV otherwise.
pub async fn read_source(data_dir: &Path, layout: &SourceLayout) -> Result<SourceTable> {
    let path = data_dir.join(&layout.file);
    if !path.is_file() {
        return Err(PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("source '{}' not found at {}", layout.name, path.display()),
        )));
    }

    let df = match path.extension().and_then(|ext| ext.to_str()) {
        Some("parquet") => read_parquet(&path).await?,
        _ => read_csv(&path).await?,
    };
    info!("Read {} rows from {}", df.height(), path.display());
    SourceTable::from_frame(layout, &df)
}

pub async fn load_sources(data_dir: &Path, layouts: &[SourceLayout]) -> Result<Vec<SourceTable>> {
    let mut tables = Vec::with_capacity(layouts.len());
    for layout in layouts {
        tables.push(read_source(data_dir, layout).await?);
    }
    Ok(tables)
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    metric: &'a str,
    value: f64,
}

/// Writes the run summary as `metric,value` rows.
pub fn write_summary<P: AsRef<Path>>(path: P, summary: &Summary) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for (metric, value) in summary.rows() {
        writer.serialize(SummaryRow { metric, value })?;
    }
    writer.flush()?;
    Ok(())
}
