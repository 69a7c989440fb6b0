//! # DialogSum dataset loading
//!
//! The corpus ships as three JSON-lines files. Train and validation records carry a single
//! reference summary, test records carry several annotations of which one is selected.
//! Loading is strict: a malformed line stops the run with its location.

mod loader;
mod record;

pub use loader::{load_splits, load_table, Schema};
pub use record::{DatasetSplits, DatasetTable, DialogueRecord, Split};
