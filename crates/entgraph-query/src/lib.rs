//! Query pipeline for entgraph.
//!
//! A [`QueryBuilder`] accumulates predicates, ordering, paging, projection
//! and `with_edge` declarations for one entity type. Each terminal (`all`,
//! `first`, `first_id`, `only`, `only_id`, `count`, `exist`, `ids`) runs
//! through the type's interceptor chain around a base querier that issues
//! one driver call and then eager-loads declared edges in batches.

pub mod builder;
pub mod eager;
pub mod entity;
pub mod interceptor;
pub mod privacy;

pub use builder::{QueryBuilder, QueryEnv};
pub use eager::{Configure, EagerEdge};
pub use entity::{Entity, scan_entity};
pub use interceptor::{
    Interceptor, InterceptorRegistry, QueryOp, QueryResult, QueryState, Querier, intercept,
    traverse,
};
pub use privacy::{Decision, QueryPolicy, QueryRule, evaluate};
