use anyhow::{Context, Result};
use console::style;

use super::{open_session, print_envelope, query::open};
use crate::types::{ExportRequest, FileFormat, ImportRequest, WriteMode};

pub struct TransferArgs {
   pub path:      String,
   pub format:    Option<FileFormat>,
   pub delimiter: Option<String>,
   pub no_header: bool,
}

impl TransferArgs {
   fn format(&self) -> Result<FileFormat> {
      match self.format {
         Some(format) => Ok(format),
         None => FileFormat::from_path(&self.path)
            .with_context(|| format!("cannot tell the format of '{}'; pass --format", self.path)),
      }
   }
}

pub async fn indexes(profile: Option<&str>, table: &str, json: bool) -> Result<()> {
   let session = open_session()?;
   let profile = open(&session, profile, table).await?;
   let result = session.list_indexes(&profile.id).await;

   if json {
      return print_envelope(result);
   }
   let indexes = result?;
   if indexes.is_empty() {
      println!("No indexes.");
   }
   for index in indexes {
      println!(
         "{}  {:?}  {}",
         style(&index.name).bold(),
         index.index_type,
         style(index.columns.join(", ")).dim()
      );
   }
   Ok(())
}

/// Opens `table` pinned to `version` and reports its column count there.
pub async fn checkout(profile: Option<&str>, table: &str, version: u64, json: bool) -> Result<()> {
   let session = open_session()?;
   let profile = open(&session, profile, table).await?;
   let result = session.checkout_version(&profile.id, version).await;

   if json {
      return print_envelope(result);
   }
   let current = result?;
   let schema = session.state(&profile.id).schema.unwrap_or_default();
   println!("{} version {current}, {} column(s)", style(table).bold(), schema.fields.len());
   Ok(())
}

pub async fn export(
   profile: Option<&str>,
   table: &str,
   args: TransferArgs,
   filter: Option<String>,
   json: bool,
) -> Result<()> {
   let session = open_session()?;
   let profile = open(&session, profile, table).await?;
   let request = ExportRequest {
      format:      args.format()?,
      path:        args.path,
      filter,
      projection:  None,
      limit:       None,
      offset:      None,
      with_header: Some(!args.no_header),
      delimiter:   args.delimiter,
   };
   let result = session.export_data(&profile.id, &request).await;

   if json {
      return print_envelope(result);
   }
   let exported = result?;
   println!("Exported {} row(s) to {}", exported.rows, style(&exported.path).bold());
   Ok(())
}

pub async fn import(
   profile: Option<&str>,
   table: &str,
   args: TransferArgs,
   overwrite: bool,
   json: bool,
) -> Result<()> {
   let session = open_session()?;
   let profile = open(&session, profile, table).await?;
   let request = ImportRequest {
      format:     args.format()?,
      path:       args.path,
      mode:       if overwrite { WriteMode::Overwrite } else { WriteMode::Append },
      has_header: Some(!args.no_header),
      delimiter:  args.delimiter,
   };
   let result = session.import_data(&profile.id, &request).await;

   if json {
      return print_envelope(result);
   }
   let written = result?;
   println!("Imported {} row(s), now at version {}", written.rows, style(written.version).bold());
   Ok(())
}

pub async fn delete(profile: Option<&str>, table: &str, filter: &str, json: bool) -> Result<()> {
   let session = open_session()?;
   let profile = open(&session, profile, table).await?;
   let result = session.delete_rows(&profile.id, filter).await;

   if json {
      return print_envelope(result);
   }
   println!("Deleted matching rows, now at version {}", style(result?).bold());
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   fn args(path: &str, format: Option<FileFormat>) -> TransferArgs {
      TransferArgs { path: path.to_string(), format, delimiter: None, no_header: false }
   }

   #[test]
   fn format_comes_from_flag_or_extension() {
      assert_eq!(args("rows.CSV", None).format().unwrap(), FileFormat::Csv);
      assert_eq!(args("rows.txt", Some(FileFormat::Jsonl)).format().unwrap(), FileFormat::Jsonl);
      assert!(args("rows.txt", None).format().is_err());
   }
}
