//! pgmodel Cache - label identity cache for the ingestion path
//!
//! Maps a (metric name, label name, label value) triple to the label ID and
//! column position the database assigned to it. Ingestion workers look a
//! label up before creating a series and populate the cache after resolving
//! a miss against the database.

pub mod inverted;
pub mod labels;

pub use inverted::{ENTRY_OVERHEAD, InvertedLabelsCache, entry_weight};
pub use labels::{LABEL_INFO_SIZE, LabelInfo, LabelKey};
