//! Conversion of Arrow record batches into [`DataChunk`] pages.

use std::collections::HashSet;

use arrow_array::RecordBatch;
use arrow_ipc::writer::StreamWriter;
use arrow_json::{ArrayWriter, ReaderBuilder};
use arrow_schema::{ArrowError, Schema, SchemaRef};
use base64::{Engine as _, engine::general_purpose};

use crate::{
   envelope::{ArrowChunk, DataChunk, DataFormat, JsonChunk},
   error::{Error, Result},
   schema::SchemaDefinition,
   types::ScanResponse,
};

/// Rows decoded per batch when turning JSON rows into Arrow.
const DECODE_BATCH_ROWS: usize = 1024;

/// Columns the driver appends to ranked results.
const SCORE_COLUMNS: [&str; 3] = ["_distance", "_score", "_relevance_score"];

/// Offset/limit window of one page.
///
/// Queries fetch `limit + 1` rows; the extra row only signals that another
/// page exists and is never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
   pub offset: usize,
   pub limit:  usize,
}

impl Window {
   pub fn new(
      offset: Option<usize>,
      limit: Option<usize>,
      default_limit: usize,
      max_limit: usize,
   ) -> Self {
      Self {
         offset: offset.unwrap_or(0),
         limit:  limit.unwrap_or(default_limit).min(max_limit),
      }
   }

   pub const fn fetch_limit(&self) -> usize {
      self.limit.saturating_add(1)
   }

   pub const fn next_offset(&self, fetched_rows: usize) -> Option<usize> {
      if fetched_rows > self.limit {
         Some(self.offset.saturating_add(self.limit))
      } else {
         None
      }
   }
}

pub fn batches_to_json_rows(batches: &[RecordBatch]) -> Result<Vec<serde_json::Value>> {
   if batches.is_empty() {
      return Ok(Vec::new());
   }

   let mut writer = ArrayWriter::new(Vec::new());
   let refs: Vec<&RecordBatch> = batches.iter().collect();
   writer.write_batches(&refs)?;
   writer.finish()?;

   Ok(serde_json::from_slice(&writer.into_inner())?)
}

pub fn batches_to_ipc_base64(batches: &[RecordBatch], schema: &Schema) -> Result<String> {
   let mut buffer = Vec::new();
   {
      let mut writer = StreamWriter::try_new(&mut buffer, schema)?;
      for batch in batches {
         writer.write(batch)?;
      }
      writer.finish()?;
   }
   Ok(general_purpose::STANDARD.encode(buffer))
}

/// Keeps at most `limit` rows, slicing the batch that crosses the boundary.
pub fn truncate_batches(batches: Vec<RecordBatch>, limit: usize) -> Vec<RecordBatch> {
   let mut remaining = limit;
   let mut kept = Vec::with_capacity(batches.len());

   for batch in batches {
      if remaining == 0 {
         break;
      }
      let rows = batch.num_rows();
      if rows <= remaining {
         remaining -= rows;
         kept.push(batch);
      } else {
         kept.push(batch.slice(0, remaining));
         remaining = 0;
      }
   }

   kept
}

/// Turns the batches fetched for `window` into one response page.
///
/// `fallback` describes the result when no batch came back, so an empty page
/// still carries a schema.
pub fn page(
   format: DataFormat,
   batches: Vec<RecordBatch>,
   fallback: &SchemaRef,
   window: Window,
) -> Result<ScanResponse> {
   let fetched: usize = batches.iter().map(RecordBatch::num_rows).sum();
   let next_offset = window.next_offset(fetched);
   let schema = batches
      .first()
      .map_or_else(|| fallback.clone(), RecordBatch::schema);
   let batches = truncate_batches(batches, window.limit);

   let chunk = match format {
      DataFormat::Json => DataChunk::Json(JsonChunk {
         rows:   batches_to_json_rows(&batches)?,
         schema: SchemaDefinition::from_arrow(&schema),
         offset: window.offset,
         limit:  window.limit,
      }),
      DataFormat::Arrow => DataChunk::Arrow(ArrowChunk {
         ipc_base64:  batches_to_ipc_base64(&batches, &schema)?,
         compression: None,
      }),
   };

   Ok(ScanResponse { chunk, next_offset })
}

/// Decodes JSON objects into batches of `schema`. Columns missing from a row
/// are null, which the schema must allow.
pub fn json_rows_to_batches(
   schema: SchemaRef,
   rows: &[serde_json::Value],
) -> Result<Vec<RecordBatch>> {
   if rows.is_empty() {
      return Err(Error::invalid("rows cannot be empty"));
   }

   let mut decoder = ReaderBuilder::new(schema)
      .with_batch_size(DECODE_BATCH_ROWS)
      .build_decoder()?;
   let mut batches = Vec::with_capacity(rows.len().div_ceil(DECODE_BATCH_ROWS));
   let mismatch =
      |e: ArrowError| Error::invalid(format!("rows do not match the table schema: {e}"));
   for chunk in rows.chunks(DECODE_BATCH_ROWS) {
      decoder.serialize(chunk).map_err(mismatch)?;
      if let Some(batch) = decoder.flush().map_err(mismatch)? {
         batches.push(batch);
      }
   }
   Ok(batches)
}

/// Identity of a row for de-duplication across result sets, ignoring the
/// ranking columns each search adds.
fn row_key(row: &serde_json::Value) -> String {
   match row {
      serde_json::Value::Object(map) => {
         let mut map = map.clone();
         for column in SCORE_COLUMNS {
            map.remove(column);
         }
         serde_json::Value::Object(map).to_string()
      },
      other => other.to_string(),
   }
}

/// Concatenates several ranked result sets into one JSON page, keeping the
/// first occurrence of each row.
///
/// Every set must have been fetched with at least `offset + limit + 1` rows
/// so the page and its `next_offset` are exact.
pub fn merged_page(
   sets: Vec<Vec<RecordBatch>>,
   fallback: &SchemaRef,
   window: Window,
) -> Result<ScanResponse> {
   let schema = sets
      .iter()
      .flatten()
      .next()
      .map_or_else(|| fallback.clone(), RecordBatch::schema);

   let mut seen = HashSet::new();
   let mut merged = Vec::new();
   for batches in &sets {
      for row in batches_to_json_rows(batches)? {
         if seen.insert(row_key(&row)) {
            merged.push(row);
         }
      }
   }

   let total = merged.len();
   let rows: Vec<_> = merged
      .into_iter()
      .skip(window.offset)
      .take(window.limit)
      .collect();
   let next_offset = (total > window.offset.saturating_add(window.limit))
      .then(|| window.offset.saturating_add(window.limit));

   Ok(ScanResponse {
      chunk: DataChunk::Json(JsonChunk {
         rows,
         schema: SchemaDefinition::from_arrow(&schema),
         offset: window.offset,
         limit: window.limit,
      }),
      next_offset,
   })
}

#[cfg(test)]
mod tests {
   use std::sync::Arc;

   use arrow_array::{Int32Array, StringArray};
   use arrow_schema::{DataType, Field};
   use serde_json::json;

   use super::*;

   fn schema() -> SchemaRef {
      Arc::new(Schema::new(vec![
         Field::new("id", DataType::Int32, false),
         Field::new("text", DataType::Utf8, false),
      ]))
   }

   fn batch(range: std::ops::Range<i32>) -> RecordBatch {
      let ids = Int32Array::from_iter_values(range.clone());
      let texts = StringArray::from_iter_values(range.map(|i| format!("item {i}")));
      RecordBatch::try_new(schema(), vec![Arc::new(ids), Arc::new(texts)]).unwrap()
   }

   #[test]
   fn window_clamps_and_defaults() {
      let window = Window::new(None, None, 100, 1000);
      assert_eq!(window, Window { offset: 0, limit: 100 });
      assert_eq!(window.fetch_limit(), 101);

      let window = Window::new(Some(20), Some(50_000), 100, 1000);
      assert_eq!(window.limit, 1000);
      assert_eq!(window.next_offset(1001), Some(1020));
      assert_eq!(window.next_offset(1000), None);
   }

   #[test]
   fn truncation_slices_across_batches() {
      let kept = truncate_batches(vec![batch(0..3), batch(3..6)], 4);
      let rows: usize = kept.iter().map(RecordBatch::num_rows).sum();
      assert_eq!(kept.len(), 2);
      assert_eq!(rows, 4);
      assert!(truncate_batches(vec![batch(0..3)], 0).is_empty());
   }

   #[test]
   fn json_page_drops_lookahead_row() {
      let window = Window { offset: 0, limit: 2 };
      let response = page(DataFormat::Json, vec![batch(0..3)], &schema(), window).unwrap();
      assert_eq!(response.next_offset, Some(2));

      let chunk = response.chunk.as_json().unwrap();
      assert_eq!(chunk.rows, vec![json!({"id": 0, "text": "item 0"}), json!({
         "id": 1,
         "text": "item 1"
      })]);
      assert_eq!(chunk.schema.fields.len(), 2);
   }

   #[test]
   fn empty_page_uses_fallback_schema() {
      let window = Window { offset: 40, limit: 10 };
      let response = page(DataFormat::Json, Vec::new(), &schema(), window).unwrap();
      let chunk = response.chunk.as_json().unwrap();
      assert!(chunk.rows.is_empty());
      assert_eq!(chunk.offset, 40);
      assert_eq!(chunk.schema.fields[0].name, "id");
      assert_eq!(response.next_offset, None);
   }

   #[test]
   fn json_rows_decode_against_schema() {
      let rows = vec![json!({"id": 1, "text": "a"}), json!({"id": 2, "text": "b"})];
      let batches = json_rows_to_batches(schema(), &rows).unwrap();
      assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 2);
      assert_eq!(batches_to_json_rows(&batches).unwrap(), rows);

      let err = json_rows_to_batches(schema(), &[json!({"id": "one", "text": "a"})]).unwrap_err();
      assert_eq!(err.code(), crate::envelope::ErrorCode::InvalidArgument);
      assert!(json_rows_to_batches(schema(), &[]).is_err());
   }

   #[test]
   fn json_rows_span_several_batches() {
      let rows: Vec<_> = (0..DECODE_BATCH_ROWS + 5)
         .map(|i| json!({"id": i, "text": format!("item {i}")}))
         .collect();
      let batches = json_rows_to_batches(schema(), &rows).unwrap();
      assert_eq!(batches.len(), 2);
      assert_eq!(batches[1].num_rows(), 5);
   }

   #[test]
   fn merged_page_drops_repeated_rows_and_pages() {
      let window = Window { offset: 1, limit: 2 };
      let response =
         merged_page(vec![vec![batch(0..3)], vec![batch(2..5)]], &schema(), window).unwrap();
      let chunk = response.chunk.as_json().unwrap();
      let ids: Vec<_> = chunk.rows.iter().map(|row| row["id"].clone()).collect();
      assert_eq!(ids, vec![json!(1), json!(2)]);
      // 0..5 without the repeated 2 is five rows, so a third page exists
      assert_eq!(response.next_offset, Some(3));

      let last = merged_page(vec![vec![batch(0..3)]], &schema(), Window { offset: 2, limit: 5 })
         .unwrap();
      assert_eq!(last.chunk.as_json().unwrap().rows.len(), 1);
      assert_eq!(last.next_offset, None);
   }

   #[test]
   fn row_identity_ignores_scores() {
      let a = json!({"id": 1, "_distance": 0.5});
      let b = json!({"id": 1, "_score": 3.2});
      assert_eq!(row_key(&a), row_key(&b));
      assert_ne!(row_key(&a), row_key(&json!({"id": 2})));
   }

   #[test]
   fn arrow_page_decodes_back_to_batches() {
      let window = Window { offset: 0, limit: 5 };
      let response = page(DataFormat::Arrow, vec![batch(0..3)], &schema(), window).unwrap();
      let decoded = response.chunk.as_arrow().unwrap().decode().unwrap();
      let rows: usize = decoded.iter().map(RecordBatch::num_rows).sum();
      assert_eq!(rows, 3);
      assert_eq!(decoded[0].schema(), schema());
   }
}
