use std::collections::HashMap;

use anyhow::{Context, Result};
use console::style;

use super::{open_session, print_envelope, resolve_profile};
use crate::{
   session::CredentialCleanup,
   types::{AuthDescriptor, ConnectOptions, ProfileDraft},
};

pub struct AddArgs {
   pub name:             String,
   pub uri:              String,
   pub storage_options:  Vec<(String, String)>,
   pub provider:         Option<String>,
   pub params:           Vec<(String, String)>,
   pub store_secret:     bool,
   pub consistency_secs: Option<u64>,
}

pub fn list(json: bool) -> Result<()> {
   let session = open_session()?;
   let profiles = session.profiles();

   if json {
      return print_envelope(Ok(profiles));
   }

   if profiles.is_empty() {
      println!("No profiles.");
      println!(
         "\nRun {} to add one.",
         style("lancedesk profiles add <name> <uri>").green()
      );
      return Ok(());
   }

   let active = session.active_profile_id();
   for profile in profiles {
      let marker = if active.as_deref() == Some(profile.id.as_str()) { "*" } else { " " };
      let auth = match &profile.auth {
         AuthDescriptor::None => String::new(),
         AuthDescriptor::Inline { provider, .. } => format!(" [{provider}, inline]"),
         AuthDescriptor::SecretRef { provider, .. } => format!(" [{provider}, vault]"),
      };
      println!(
         "{} {} {}{}  {}",
         style(marker).green(),
         style(&profile.name).bold(),
         style(&profile.uri).cyan(),
         style(auth).dim(),
         style(&profile.id).dim()
      );
   }
   Ok(())
}

pub fn add(args: AddArgs, json: bool) -> Result<()> {
   let session = open_session()?;
   let params: HashMap<String, String> = args.params.into_iter().collect();

   let auth = match args.provider {
      None => AuthDescriptor::None,
      Some(provider) if args.store_secret => {
         let reference = session
            .store_credential(&provider, params, Some(&args.name))
            .context("failed to store credential")?;
         AuthDescriptor::SecretRef { provider, reference }
      },
      Some(provider) => AuthDescriptor::Inline { provider, params },
   };

   let draft = ProfileDraft {
      name: args.name,
      uri: args.uri,
      storage_options: args.storage_options.into_iter().collect(),
      options: ConnectOptions { read_consistency_interval_seconds: args.consistency_secs },
      auth,
   };
   let result = session.create_profile(&draft);

   if json {
      return print_envelope(result);
   }
   let profile = result?;
   println!("Added profile {} ({})", style(&profile.name).bold(), style(&profile.id).dim());
   Ok(())
}

pub async fn remove(selector: &str, json: bool) -> Result<()> {
   let session = open_session()?;
   let profile = resolve_profile(&session, Some(selector))?;
   let result = session.delete_profile(&profile.id).await;

   if json {
      return print_envelope(result);
   }
   let report = result?;
   println!("Removed profile {}", style(&report.profile.name).bold());
   match report.credential {
      CredentialCleanup::NotApplicable => {},
      CredentialCleanup::Removed { reference } => {
         println!("  credential {} removed from vault", style(reference).dim());
      },
      CredentialCleanup::Retained { reference, remaining } => {
         println!(
            "  credential {} kept, still used by {remaining} profile(s)",
            style(reference).dim()
         );
      },
      CredentialCleanup::Failed { reference, message } => {
         println!(
            "  {} could not remove credential {}: {message}",
            style("warning:").yellow(),
            style(reference).dim()
         );
      },
   }
   Ok(())
}

pub fn select(selector: &str, json: bool) -> Result<()> {
   let session = open_session()?;
   let profile = resolve_profile(&session, Some(selector))?;
   let result = session.select(&profile.id);

   if json {
      return print_envelope(result);
   }
   let profile = result?;
   println!("Selected {}", style(&profile.name).bold());
   Ok(())
}
