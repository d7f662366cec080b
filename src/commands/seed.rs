use anyhow::{Context, Result};
use console::style;

use crate::seed::{self, SAMPLE_TABLE, SeedOutcome};

pub async fn execute(uri: &str, rows: usize) -> Result<()> {
   let outcome = seed::seed_items(uri, rows)
      .await
      .with_context(|| format!("failed to seed {uri}"))?;

   match outcome {
      SeedOutcome::Created { rows } => {
         println!("Created {} with {rows} rows in {}", style(SAMPLE_TABLE).bold(), style(uri).cyan());
      },
      SeedOutcome::AlreadyExists => {
         println!("{} already exists in {}", style(SAMPLE_TABLE).bold(), style(uri).cyan());
      },
   }
   Ok(())
}
