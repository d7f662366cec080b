//! Connection management core for browsing `LanceDB` databases.
//!
//! lancedesk tracks the live state of every connection profile in a
//! [`registry::ConnectionRegistry`], sequences profile-level flows through a
//! [`session::Session`], and answers every cross-boundary operation with a
//! versioned [`envelope::Envelope`].

pub mod client;
pub mod commands;
pub mod config;
pub mod envelope;
pub mod error;
pub mod profiles;
pub mod registry;
pub mod schema;
pub mod seed;
pub mod session;
pub mod types;
pub mod vault;

pub use error::{Error, Result};
pub use types::*;
