//! Core types and the driver contract for entgraph.
//!
//! `entgraph-core` is the **foundation layer** of the workspace. It defines the
//! data types every other crate passes around and the one trait backends
//! implement.
//!
//! # Role In The Architecture
//!
//! - **Data model**: `Value`, `Row` and `FieldKind` describe column values, result
//!   rows and the semantic type of a field, including its scan contract.
//! - **Operation specs**: `CreateSpec`, `QuerySpec`, `UpdateSpec`, `DeleteSpec`
//!   and `BatchCreateSpec` are the transient, per-call descriptions the pipelines
//!   hand to a `Driver`.
//! - **Selectors**: `Predicate` is the portable filter tree, including graph
//!   steps (`HasNeighbors`, `HasNeighborsWith`).
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from asupersync so
//!   every driver call is cancel-correct.
//!
//! # Who Uses This Crate
//!
//! - `entgraph-schema` resolves edges into `Relation`s defined here.
//! - `entgraph-query` and `entgraph-mutation` build specs and call the `Driver`.
//! - `entgraph-memory` implements `Driver`.

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

#[macro_use]
mod macros;

pub mod dialect;
pub mod driver;
pub mod error;
pub mod gid;
pub mod predicate;
pub mod relationship;
pub mod row;
pub mod spec;
pub mod types;
pub mod value;

pub use dialect::Dialect;
pub use driver::{DebugDriver, Driver};
pub use error::{
    ConfigError, ConfigErrorKind, ConstraintError, Error, NotFoundError, NotLoadedError,
    NotSingularError, PrivacyError, QueryError, QueryErrorKind, Result, ValidationError,
    is_constraint_error, is_constraint_violation, is_not_found, is_not_loaded, is_not_singular,
    is_validation_error, mask_not_found,
};
pub use gid::GlobalId;
pub use predicate::{CompareOp, NeighborStep, Predicate, StepNode, TextOp};
pub use relationship::{FkOwner, Relation, RelationKind};
pub use row::Row;
pub use spec::{
    BatchCreateSpec, ConflictAction, ConflictTarget, ConflictUpdate, ConflictValue, CreateSpec,
    DeleteSpec, EdgeMutation, EdgeOp, EdgeSpec, FieldSpec, IdSpec, OrderBy, QuerySpec, UpdateSpec,
};
pub use types::{CustomScanner, FieldKind, ScanTarget};
pub use value::Value;
