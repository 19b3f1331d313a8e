//! Schema graph, relation resolution, DDL emission and migrations.
//!
//! `entgraph-schema` turns entity declarations into an immutable [`Graph`]:
//!
//! - [`EntityType`], [`Field`] and [`Edge`] are the declaration builders.
//! - [`SchemaBuilder::build`] resolves every edge through
//!   [`resolve::resolve_edge`], emits hidden foreign-key columns and computes
//!   dialect-conditional requiredness.
//! - [`ddl`] renders `CREATE TABLE` statements, [`migrate`] applies versioned
//!   migrations and [`generate`] renders per-type artifacts over a worker pool.

pub mod ddl;
pub mod edge;
pub mod field;
pub mod generate;
pub mod graph;
pub mod migrate;
pub mod resolve;
pub mod validate;

pub use edge::{Edge, EdgeStorage};
pub use field::{DefaultValue, Field, Requiredness};
pub use generate::{
    Artifact, DdlArtifact, GeneratedFile, Generator, GeneratorConfig, GeneratorMetrics,
    ManifestArtifact,
};
pub use graph::{EntityType, ForeignKey, Graph, GraphConfig, JoinTable, SchemaBuilder};
pub use migrate::{
    Migration, MigrationExecutor, MigrationRecord, MigrationState, Migrator, MigratorConfig,
};
pub use resolve::{resolve_edge, snake_case};
pub use validate::{Validator, matches_pattern};
