//! Disconnection / reconnection (DCRC) reporting over utility meter exports.
//!
//! Records are loaded once into typed [`MeterRecord`]s. Each report call then
//! takes an explicit [`QueryContext`], annotates the records for its window
//! ([`filter::apply_filters`]) and feeds the annotated view to the rollups in
//! [`reports`] or the neighbour scan in [`proximity`].
pub mod config;
pub mod error;
pub mod filter;
pub mod loader;
pub mod output;
pub mod proximity;
pub mod reports;
pub mod types;
pub mod util;

pub use error::{Error, Result};
pub use filter::{AnnotatedRecord, QueryContext, ReportWindow};
pub use types::{AgingBucket, MeterRecord, StatusKind};
