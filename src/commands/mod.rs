//! CLI subcommands. Each drives the [`Session`] the way a UI surface would.

pub mod credentials;
pub mod data;
pub mod profiles;
pub mod query;
pub mod seed;
pub mod tables;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::{
   config,
   envelope::Envelope,
   registry::{LaneOutcome, SkipReason},
   session::Session,
   types::ConnectionProfile,
};

pub fn open_session() -> Result<Session> {
   Session::from_config(config::get()).context("failed to open session")
}

/// Finds a profile by id or name, falling back to the active profile.
pub fn resolve_profile(session: &Session, selector: Option<&str>) -> Result<ConnectionProfile> {
   let profiles = session.profiles();
   match selector {
      Some(selector) => profiles
         .into_iter()
         .find(|p| p.id == selector || p.name == selector)
         .with_context(|| format!("no profile named '{selector}'")),
      None => {
         let active = session
            .active_profile_id()
            .context("no profile selected; pass --profile or run `lancedesk profiles select`")?;
         session.profile(&active).map_err(Into::into)
      },
   }
}

/// Turns a dropped lane request into a CLI error.
pub fn require<T>(outcome: LaneOutcome<T>, what: &str) -> Result<T> {
   match outcome {
      LaneOutcome::Completed(value) => Ok(value),
      LaneOutcome::Skipped(SkipReason::NotConnected) => bail!("{what}: not connected"),
      LaneOutcome::Skipped(SkipReason::Busy(lane)) => {
         bail!("{what}: {} already in progress", lane.as_str())
      },
      LaneOutcome::Skipped(SkipReason::Superseded) => bail!("{what}: superseded by a reset"),
   }
}

/// Connects `profile` and returns its table names.
pub async fn connect(session: &Session, profile: &ConnectionProfile) -> Result<Vec<String>> {
   let flow = session
      .connect(&profile.id)
      .await
      .with_context(|| format!("failed to connect '{}'", profile.name))?;
   require(flow.connect, "connect")?;
   match flow.tables {
      Some(tables) => require(tables, "list tables"),
      None => Ok(Vec::new()),
   }
}

/// Prints `result` as a wire envelope.
pub fn print_envelope<T: Serialize>(result: crate::Result<T>) -> Result<()> {
   let envelope = Envelope::from(result);
   println!("{}", serde_json::to_string_pretty(&envelope)?);
   Ok(())
}
