//! Backend-independent write logic.
//!
//! - [`upsert`]: identity resolution and insert-if-absent for single nodes
//! - [`records`]: decomposition of discovered records into nodes and edges
//!
//! Both operate on an [`AssetWriter`], so the same code path runs against the
//! relational and the graph backend.

pub mod records;
pub mod upsert;

pub use records::{RecordPlan, apply_record};
pub use upsert::{AssetWriter, Insertion, Lookup, upsert, upsert_content};
