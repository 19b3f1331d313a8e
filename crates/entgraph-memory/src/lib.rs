//! In-memory reference driver for entgraph.
//!
//! [`MemoryDriver`] implements the [`Driver`](entgraph_core::Driver) contract
//! over plain Rust collections built from a [`Graph`](entgraph_schema::Graph):
//! one table per entity type and per join table. It enforces unique
//! constraints, resolves upsert conflicts, applies edge operations and makes
//! every write atomic. Per-operation counters ([`DriverStats`]) make round
//! trips observable in tests.

mod driver;
mod eval;
mod store;

pub use driver::{DriverStats, MemoryDriver};
