//! Table schema description exchanged with the UI.

use std::{
   collections::{HashMap, HashSet},
   sync::Arc,
};

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Column data-type tag.
///
/// Arrow types outside this set are reported as [`FieldType::Other`] with the
/// native type name kept alongside, so browsing never fails on exotic columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
   Int8,
   Int16,
   Int32,
   Int64,
   #[serde(rename = "uint8")]
   UInt8,
   #[serde(rename = "uint16")]
   UInt16,
   #[serde(rename = "uint32")]
   UInt32,
   #[serde(rename = "uint64")]
   UInt64,
   Float16,
   Float32,
   Float64,
   Boolean,
   Utf8,
   LargeUtf8,
   Binary,
   LargeBinary,
   /// Fixed-size list of float32, i.e. an embedding vector.
   FixedSizeListFloat32,
   Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
   pub name:          String,
   pub data_type:     FieldType,
   pub nullable:      bool,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub vector_length: Option<i32>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub native_type:   Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub metadata:      Option<HashMap<String, String>>,
}

impl SchemaField {
   pub fn new(name: impl Into<String>, data_type: FieldType, nullable: bool) -> Self {
      Self {
         name: name.into(),
         data_type,
         nullable,
         vector_length: None,
         native_type: None,
         metadata: None,
      }
   }

   pub fn vector(name: impl Into<String>, length: i32, nullable: bool) -> Self {
      Self {
         vector_length: Some(length),
         ..Self::new(name, FieldType::FixedSizeListFloat32, nullable)
      }
   }

   pub const fn is_vector(&self) -> bool {
      matches!(self.data_type, FieldType::FixedSizeListFloat32)
   }

   fn from_arrow(field: &Field) -> Self {
      let (data_type, vector_length) = match field.data_type() {
         DataType::Int8 => (FieldType::Int8, None),
         DataType::Int16 => (FieldType::Int16, None),
         DataType::Int32 => (FieldType::Int32, None),
         DataType::Int64 => (FieldType::Int64, None),
         DataType::UInt8 => (FieldType::UInt8, None),
         DataType::UInt16 => (FieldType::UInt16, None),
         DataType::UInt32 => (FieldType::UInt32, None),
         DataType::UInt64 => (FieldType::UInt64, None),
         DataType::Float16 => (FieldType::Float16, None),
         DataType::Float32 => (FieldType::Float32, None),
         DataType::Float64 => (FieldType::Float64, None),
         DataType::Boolean => (FieldType::Boolean, None),
         DataType::Utf8 => (FieldType::Utf8, None),
         DataType::LargeUtf8 => (FieldType::LargeUtf8, None),
         DataType::Binary => (FieldType::Binary, None),
         DataType::LargeBinary => (FieldType::LargeBinary, None),
         DataType::FixedSizeList(item, len) if item.data_type() == &DataType::Float32 => {
            (FieldType::FixedSizeListFloat32, Some(*len))
         },
         _ => (FieldType::Other, None),
      };

      Self {
         name: field.name().clone(),
         data_type,
         nullable: field.is_nullable(),
         vector_length,
         native_type: matches!(data_type, FieldType::Other)
            .then(|| format!("{:?}", field.data_type())),
         metadata: (!field.metadata().is_empty()).then(|| field.metadata().clone()),
      }
   }

   pub(crate) fn to_arrow(&self) -> Result<Field> {
      let data_type = match self.data_type {
         FieldType::Int8 => DataType::Int8,
         FieldType::Int16 => DataType::Int16,
         FieldType::Int32 => DataType::Int32,
         FieldType::Int64 => DataType::Int64,
         FieldType::UInt8 => DataType::UInt8,
         FieldType::UInt16 => DataType::UInt16,
         FieldType::UInt32 => DataType::UInt32,
         FieldType::UInt64 => DataType::UInt64,
         FieldType::Float16 => DataType::Float16,
         FieldType::Float32 => DataType::Float32,
         FieldType::Float64 => DataType::Float64,
         FieldType::Boolean => DataType::Boolean,
         FieldType::Utf8 => DataType::Utf8,
         FieldType::LargeUtf8 => DataType::LargeUtf8,
         FieldType::Binary => DataType::Binary,
         FieldType::LargeBinary => DataType::LargeBinary,
         FieldType::FixedSizeListFloat32 => {
            let length = self.checked_vector_length()?;
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), length)
         },
         FieldType::Other => {
            return Err(Error::invalid(format!(
               "field '{}' has no concrete data type",
               self.name
            )));
         },
      };

      let mut field = Field::new(&self.name, data_type, self.nullable);
      if let Some(metadata) = &self.metadata {
         field = field.with_metadata(metadata.clone());
      }
      Ok(field)
   }

   fn checked_vector_length(&self) -> Result<i32> {
      match self.vector_length {
         Some(length) if length > 0 => Ok(length),
         Some(_) => {
            Err(Error::invalid(format!("vector field '{}' must have a positive length", self.name)))
         },
         None => Err(Error::invalid(format!("vector field '{}' requires a length", self.name))),
      }
   }
}

/// Ordered field list of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
   pub fields: Vec<SchemaField>,
}

impl SchemaDefinition {
   pub fn from_arrow(schema: &Schema) -> Self {
      Self { fields: schema.fields().iter().map(|f| SchemaField::from_arrow(f)).collect() }
   }

   pub fn field(&self, name: &str) -> Option<&SchemaField> {
      self.fields.iter().find(|f| f.name == name)
   }

   /// Checks the invariants a schema must hold before it is sent to the driver:
   /// at least one field, non-empty unique names, positive vector lengths.
   pub fn validate(&self) -> Result<()> {
      if self.fields.is_empty() {
         return Err(Error::invalid("schema must contain at least one field"));
      }

      let mut seen = HashSet::with_capacity(self.fields.len());
      for field in &self.fields {
         if field.name.trim().is_empty() {
            return Err(Error::invalid("field name cannot be empty"));
         }
         if !seen.insert(field.name.as_str()) {
            return Err(Error::invalid(format!("duplicate field name '{}'", field.name)));
         }
         if field.is_vector() {
            field.checked_vector_length()?;
         }
      }
      Ok(())
   }

   pub fn to_arrow(&self) -> Result<SchemaRef> {
      self.validate()?;
      let fields = self
         .fields
         .iter()
         .map(SchemaField::to_arrow)
         .collect::<Result<Vec<_>>>()?;
      Ok(Arc::new(Schema::new(fields)))
   }
}

#[cfg(test)]
mod tests {
   use pretty_assertions::assert_eq;
   use serde_json::json;

   use super::*;
   use crate::envelope::ErrorCode;

   fn items_schema() -> SchemaDefinition {
      SchemaDefinition {
         fields: vec![
            SchemaField::new("id", FieldType::Int32, false),
            SchemaField::new("text", FieldType::Utf8, true),
            SchemaField::vector("vector", 3, false),
         ],
      }
   }

   #[test]
   fn arrow_roundtrip_keeps_vector_length() {
      let arrow = items_schema().to_arrow().unwrap();
      let back = SchemaDefinition::from_arrow(&arrow);
      assert_eq!(back, items_schema());
      assert_eq!(back.field("vector").unwrap().vector_length, Some(3));
   }

   #[test]
   fn unknown_arrow_types_are_reported_as_other() {
      let schema = Schema::new(vec![Field::new("at", DataType::Date32, true)]);
      let def = SchemaDefinition::from_arrow(&schema);
      assert_eq!(def.fields[0].data_type, FieldType::Other);
      assert_eq!(def.fields[0].native_type.as_deref(), Some("Date32"));
      assert!(def.to_arrow().is_err());
   }

   #[test]
   fn rejects_duplicate_names() {
      let mut schema = items_schema();
      schema.fields.push(SchemaField::new("id", FieldType::Int64, true));
      assert_eq!(schema.validate().unwrap_err().code(), ErrorCode::InvalidArgument);
   }

   #[test]
   fn rejects_non_positive_vector_length() {
      let schema = SchemaDefinition { fields: vec![SchemaField::vector("v", 0, false)] };
      assert!(schema.validate().is_err());

      let mut missing = SchemaField::vector("v", 4, false);
      missing.vector_length = None;
      assert!(SchemaDefinition { fields: vec![missing] }.validate().is_err());
   }

   #[test]
   fn rejects_empty_schema() {
      assert!(SchemaDefinition::default().validate().is_err());
   }

   #[test]
   fn wire_shape_uses_camel_case() {
      let value = serde_json::to_value(SchemaField::vector("embedding", 8, false)).unwrap();
      assert_eq!(
         value,
         json!({
            "name": "embedding",
            "dataType": "fixed_size_list_float32",
            "nullable": false,
            "vectorLength": 8
         })
      );
      let value = serde_json::to_value(SchemaField::new("n", FieldType::UInt16, true)).unwrap();
      assert_eq!(value["dataType"], "uint16");
   }
}
