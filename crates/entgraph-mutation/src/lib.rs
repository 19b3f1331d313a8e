//! Mutation pipeline for entgraph.
//!
//! Builders accumulate changes into a [`Mutation`]. On `save` the pipeline
//! applies field defaults, validates, then runs the type's hook chain around
//! a base mutator that translates the mutation into a driver spec and
//! performs exactly one write. Bulk creates link one chain per row and write
//! all rows in a single `batch_create`; upserts attach a resolved conflict
//! clause to the insert.

pub mod builder;
pub mod bulk;
pub mod hook;
pub mod mutation;
pub mod pipeline;
pub mod upsert;

pub use builder::{
    CreateBuilder, DeleteBuilder, DeleteOneBuilder, UpdateBuilder, UpdateOneBuilder, UpsertOne,
};
pub use bulk::{CreateBulkBuilder, UpsertBulk};
pub use hook::{
    Hook, HookRegistry, MutationPolicy, MutationRule, MutationValue, Mutator, hook, on, reject,
    unless, when,
};
pub use mutation::{Mutation, Op};
pub use pipeline::MutationEnv;
pub use upsert::{Resolution, Upsert, add_value, set_value};
