use anyhow::Result;
use console::style;

use super::{open_session, print_envelope};
use crate::session::CredentialCleanup;

pub fn list(json: bool) -> Result<()> {
   let session = open_session()?;
   let result = session.vault().list().map_err(crate::Error::from);

   if json {
      return print_envelope(result);
   }

   let secrets = result?;
   if secrets.is_empty() {
      println!("Vault is empty.");
      return Ok(());
   }
   for secret in secrets {
      println!(
         "{} {} {}",
         style(&secret.reference).bold(),
         style(&secret.provider).cyan(),
         style(secret.label.unwrap_or_default()).dim()
      );
   }
   Ok(())
}

pub fn sweep(json: bool) -> Result<()> {
   let session = open_session()?;
   let result = session.collect_orphan_credentials();

   if json {
      return print_envelope(result);
   }

   let swept = result?;
   if swept.is_empty() {
      println!("No orphaned credentials.");
   }
   for cleanup in swept {
      match cleanup {
         CredentialCleanup::Removed { reference } => {
            println!("removed {}", style(reference).dim());
         },
         CredentialCleanup::Failed { reference, message } => {
            println!("{} {reference}: {message}", style("failed").red());
         },
         CredentialCleanup::NotApplicable | CredentialCleanup::Retained { .. } => {},
      }
   }
   Ok(())
}
