//! Sample `items` table for trying the browser against a local database.

use std::sync::Arc;

use arrow_array::{
   FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};

use crate::{client::lance::ClientError, error::Result};

pub const SAMPLE_TABLE: &str = "items";
pub const VECTOR_DIM: i32 = 3;
pub const DEFAULT_ROWS: usize = 50;
pub const MAX_ROWS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
   Created { rows: usize },
   AlreadyExists,
}

pub fn items_schema() -> SchemaRef {
   Arc::new(Schema::new(vec![
      Field::new("id", DataType::Int32, false),
      Field::new("text", DataType::Utf8, false),
      Field::new(
         "vector",
         DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), VECTOR_DIM),
         false,
      ),
   ]))
}

/// Builds `rows` deterministic rows: ids from zero, `item {id}` texts, and
/// vectors spread along the first axis so nearest-neighbour order is stable.
pub fn items_batch(rows: usize) -> Result<RecordBatch> {
   let rows = rows.clamp(1, MAX_ROWS);
   let ids = Int32Array::from_iter_values(0..rows as i32);
   let texts = StringArray::from_iter_values((0..rows).map(|i| format!("item {i}")));

   let values = Float32Array::from_iter_values((0..rows).flat_map(|i| {
      let x = i as f32 / rows as f32;
      [x, 1.0 - x, (i % 7) as f32 / 7.0]
   }));
   let vectors = FixedSizeListArray::try_new(
      Arc::new(Field::new("item", DataType::Float32, true)),
      VECTOR_DIM,
      Arc::new(values),
      None,
   )?;

   Ok(RecordBatch::try_new(items_schema(), vec![
      Arc::new(ids),
      Arc::new(texts),
      Arc::new(vectors),
   ])?)
}

/// Creates the sample table at `uri` unless a table of that name exists.
pub async fn seed_items(uri: &str, rows: usize) -> Result<SeedOutcome> {
   let conn = lancedb::connect(uri)
      .execute()
      .await
      .map_err(|source| ClientError::Connect { uri: uri.to_string(), source })?;

   let existing = conn
      .table_names()
      .execute()
      .await
      .map_err(ClientError::ListTables)?;
   if existing.iter().any(|name| name == SAMPLE_TABLE) {
      tracing::info!(uri, table = SAMPLE_TABLE, "sample table already exists");
      return Ok(SeedOutcome::AlreadyExists);
   }

   let batch = items_batch(rows)?;
   let rows = batch.num_rows();
   let reader = RecordBatchIterator::new(vec![Ok(batch)], items_schema());
   conn
      .create_table(SAMPLE_TABLE, reader)
      .execute()
      .await
      .map_err(|source| ClientError::CreateTable { name: SAMPLE_TABLE.to_string(), source })?;

   tracing::info!(uri, table = SAMPLE_TABLE, rows, "seeded sample table");
   Ok(SeedOutcome::Created { rows })
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::schema::{FieldType, SchemaDefinition};

   #[test]
   fn batch_matches_schema_and_clamps_rows() {
      let batch = items_batch(0).unwrap();
      assert_eq!(batch.num_rows(), 1);
      assert_eq!(items_batch(MAX_ROWS + 5).unwrap().num_rows(), MAX_ROWS);

      let batch = items_batch(DEFAULT_ROWS).unwrap();
      assert_eq!(batch.num_rows(), DEFAULT_ROWS);
      let schema = SchemaDefinition::from_arrow(&batch.schema());
      let vector = schema.field("vector").unwrap();
      assert_eq!(vector.data_type, FieldType::FixedSizeListFloat32);
      assert_eq!(vector.vector_length, Some(VECTOR_DIM));
   }
}
