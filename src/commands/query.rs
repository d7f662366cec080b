use anyhow::{Context, Result, bail};
use console::style;

use super::{connect, open_session, print_envelope, require, resolve_profile};
use crate::{
   envelope::{DataChunk, DataFormat},
   session::Session,
   types::{
      ConnectionProfile, FtsSearchRequest, ScanRequest, ScanResponse, VectorSearchRequest,
   },
};

pub struct ScanArgs {
   pub limit:   Option<usize>,
   pub offset:  Option<usize>,
   pub filter:  Option<String>,
   pub columns: Vec<String>,
   pub arrow:   bool,
}

pub struct SearchArgs {
   pub vector: Option<String>,
   pub text:   Option<String>,
   pub column: Option<String>,
   pub top_k:  Option<usize>,
   pub filter: Option<String>,
}

pub(super) async fn open(
   session: &Session,
   profile: Option<&str>,
   table: &str,
) -> Result<ConnectionProfile> {
   let profile = resolve_profile(session, profile)?;
   connect(session, &profile).await?;
   require(session.open_table(&profile.id, table).await?, "open")?;
   Ok(profile)
}

fn parse_vector(raw: &str) -> Result<Vec<f32>> {
   raw.split(',')
      .map(|v| {
         v.trim()
            .parse::<f32>()
            .with_context(|| format!("invalid vector component '{v}'"))
      })
      .collect()
}

fn print_page(response: &ScanResponse) -> Result<()> {
   match &response.chunk {
      DataChunk::Json(chunk) => {
         for row in &chunk.rows {
            println!("{}", serde_json::to_string(row)?);
         }
         println!(
            "\n{}",
            style(format!("{} row(s) from offset {}", chunk.rows.len(), chunk.offset)).dim()
         );
      },
      DataChunk::Arrow(chunk) => {
         let batches = chunk.decode()?;
         let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
         println!(
            "{}",
            style(format!(
               "{rows} row(s) in {} arrow batch(es), {} bytes base64",
               batches.len(),
               chunk.ipc_base64.len()
            ))
            .dim()
         );
      },
   }
   if let Some(next) = response.next_offset {
      println!("{}", style(format!("more rows: --offset {next}")).dim());
   }
   Ok(())
}

pub async fn scan(profile: Option<&str>, table: &str, args: ScanArgs, json: bool) -> Result<()> {
   let session = open_session()?;
   let profile = open(&session, profile, table).await?;

   let request = ScanRequest {
      format:     if args.arrow { DataFormat::Arrow } else { DataFormat::Json },
      projection: (!args.columns.is_empty()).then_some(args.columns),
      filter:     args.filter,
      limit:      args.limit,
      offset:     args.offset,
   };
   let result = session.scan(&profile.id, &request).await;

   if json {
      return print_envelope(result);
   }
   print_page(&result?)
}

pub async fn search(
   profile: Option<&str>,
   table: &str,
   args: SearchArgs,
   json: bool,
) -> Result<()> {
   let session = open_session()?;
   let profile = open(&session, profile, table).await?;

   let result = match (args.vector, args.text) {
      (Some(vector), None) => {
         let request = VectorSearchRequest {
            vector: parse_vector(&vector)?,
            column: args.column,
            top_k: args.top_k,
            filter: args.filter,
            ..Default::default()
         };
         session.vector_search(&profile.id, &request).await
      },
      (None, Some(text)) => {
         let request = FtsSearchRequest {
            query: text,
            limit: args.top_k,
            filter: args.filter,
            ..Default::default()
         };
         session.fts_search(&profile.id, &request).await
      },
      _ => bail!("pass exactly one of --vector or --text"),
   };

   if json {
      return print_envelope(result);
   }
   print_page(&result?)
}

pub async fn versions(profile: Option<&str>, table: &str, json: bool) -> Result<()> {
   let session = open_session()?;
   let profile = open(&session, profile, table).await?;
   let result = session.list_versions(&profile.id).await;

   if json {
      return print_envelope(result);
   }
   for version in result? {
      println!("{:>6}  {}", style(version.version).bold(), style(version.timestamp).dim());
   }
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn parses_comma_separated_vectors() {
      assert_eq!(parse_vector("0.1, 0.2,0.3").unwrap(), vec![0.1, 0.2, 0.3]);
      assert!(parse_vector("0.1,x").is_err());
   }
}
