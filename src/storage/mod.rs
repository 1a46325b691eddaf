//! Storage layer.
//!
//! One [`Store`] contract with two backends:
//! - **Relational**: nodes, edges and provenance emulated over `SQLite` tables
//! - **Graph**: key-addressed nodes and labelled edges in a [`graph::GraphEngine`]
//!
//! [`open_store`] picks the backend named by the configuration.

// Dropping pooled connections a statement early buys nothing.
#![allow(clippy::significant_drop_tightening)]

mod factory;
pub mod graph;
pub mod metrics;
pub mod migrations;
pub mod sqlite;
pub mod traits;

pub use factory::{Backend, open_store};
pub use graph::{GraphStore, MemoryGraphEngine};
pub use migrations::{MigrationManager, MigrationSource, MigrationStatus};
pub use sqlite::SqliteStore;
pub use traits::Store;
