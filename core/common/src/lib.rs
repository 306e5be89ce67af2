//! Common utilities and types shared across ShareGraph crates.
//!
//! This module provides the error taxonomy used by the token lifecycle and
//! the resource navigator, plus validated identifiers for remote resources.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DriveId, ItemId, SiteId};
