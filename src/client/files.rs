//! Table data as CSV, Parquet or JSON lines files.

use std::{
   fs::File,
   io::{BufRead, BufReader, BufWriter, Write},
   path::Path,
};

use arrow_array::RecordBatch;
use arrow_schema::{ArrowError, SchemaRef};
use parquet::arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder};

use super::codec;
use crate::{
   error::{Error, Result},
   types::FileFormat,
};

/// Single-byte field delimiter, `,` when unset or blank.
pub fn parse_delimiter(raw: Option<&str>) -> Result<u8> {
   match raw.map(str::trim).filter(|d| !d.is_empty()) {
      None => Ok(b','),
      Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
      Some(d) => Err(Error::invalid(format!("delimiter must be a single character, got '{d}'"))),
   }
}

fn malformed(path: &Path) -> impl Fn(ArrowError) -> Error + '_ {
   move |e| Error::invalid(format!("cannot read '{}': {e}", path.display()))
}

/// Reads a whole file into batches. CSV and JSON lines are decoded against
/// `schema`; Parquet keeps the file's own schema.
pub fn read_batches(
   path: &Path,
   format: FileFormat,
   schema: SchemaRef,
   has_header: bool,
   delimiter: u8,
) -> Result<Vec<RecordBatch>> {
   let file = File::open(path)?;
   match format {
      FileFormat::Csv => {
         let reader = arrow_csv::ReaderBuilder::new(schema)
            .with_header(has_header)
            .with_delimiter(delimiter)
            .build(file)
            .map_err(malformed(path))?;
         reader
            .collect::<Result<Vec<_>, _>>()
            .map_err(malformed(path))
      },
      FileFormat::Parquet => {
         let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
         reader
            .collect::<Result<Vec<_>, _>>()
            .map_err(malformed(path))
      },
      FileFormat::Jsonl => {
         let mut rows = Vec::new();
         for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
               continue;
            }
            let row: serde_json::Value = serde_json::from_str(line).map_err(|e| {
               Error::invalid(format!("{} line {}: {e}", path.display(), number + 1))
            })?;
            rows.push(row);
         }
         if rows.is_empty() {
            return Err(Error::invalid(format!("no rows found in '{}'", path.display())));
         }
         codec::json_rows_to_batches(schema, &rows)
      },
   }
}

/// Writes `batches` to a new file at `path`. `schema` describes the file when
/// there are no batches, so CSV headers and Parquet footers are still valid.
pub fn write_batches(
   path: &Path,
   format: FileFormat,
   batches: &[RecordBatch],
   schema: &SchemaRef,
   with_header: bool,
   delimiter: u8,
) -> Result<()> {
   let file = File::create(path)?;
   match format {
      FileFormat::Csv => {
         let mut writer = arrow_csv::WriterBuilder::new()
            .with_header(with_header)
            .with_delimiter(delimiter)
            .build(BufWriter::new(file));
         if batches.is_empty() {
            writer.write(&RecordBatch::new_empty(schema.clone()))?;
         }
         for batch in batches {
            writer.write(batch)?;
         }
         writer.into_inner().flush()?;
      },
      FileFormat::Parquet => {
         let file_schema = batches.first().map_or_else(|| schema.clone(), RecordBatch::schema);
         let mut writer = ArrowWriter::try_new(file, file_schema, None)?;
         for batch in batches {
            writer.write(batch)?;
         }
         writer.close()?;
      },
      FileFormat::Jsonl => {
         let mut writer = arrow_json::LineDelimitedWriter::new(BufWriter::new(file));
         let refs: Vec<&RecordBatch> = batches.iter().collect();
         writer.write_batches(&refs)?;
         writer.finish()?;
         writer.into_inner().flush()?;
      },
   }
   Ok(())
}
