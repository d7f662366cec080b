use anyhow::Result;
use console::style;

use super::{connect, open_session, print_envelope, require, resolve_profile};
use crate::{
   registry::OpenedTable,
   schema::SchemaDefinition,
   types::{ListTablesResponse, TableInfo},
};

pub async fn list(profile: Option<&str>, json: bool) -> Result<()> {
   let session = open_session()?;
   let profile = resolve_profile(&session, profile)?;
   let tables = connect(&session, &profile).await?;

   if json {
      let tables = tables.into_iter().map(|name| TableInfo { name }).collect();
      return print_envelope(Ok(ListTablesResponse { tables }));
   }

   println!(
      "\n{} {}",
      style(format!("{} table(s)", tables.len())).bold(),
      style(format!("on {}", profile.uri)).dim()
   );
   for name in tables {
      println!("  {name}");
   }
   Ok(())
}

pub async fn schema(profile: Option<&str>, table: &str, json: bool) -> Result<()> {
   let session = open_session()?;
   let profile = resolve_profile(&session, profile)?;
   connect(&session, &profile).await?;
   let OpenedTable { schema, .. } = require(session.open_table(&profile.id, table).await?, "open")?;

   if json {
      return print_envelope(Ok(schema));
   }
   print_schema(table, &schema);
   Ok(())
}

fn print_schema(table: &str, schema: &SchemaDefinition) {
   println!("\n{}", style(table).bold());
   for field in &schema.fields {
      let mut kind = serde_json::to_value(field.data_type)
         .ok()
         .and_then(|v| v.as_str().map(str::to_string))
         .unwrap_or_default();
      if let Some(length) = field.vector_length {
         kind = format!("{kind}[{length}]");
      }
      if let Some(native) = &field.native_type {
         kind = format!("{kind} ({native})");
      }
      let nullable = if field.nullable { "" } else { " not null" };
      println!("  {} {}{}", field.name, style(kind).cyan(), style(nullable).dim());
   }
}
