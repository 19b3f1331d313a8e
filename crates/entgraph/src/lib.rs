//! Schema-driven entity graph data-access layer.
//!
//! Declare entity types, their fields and their edges with a
//! [`SchemaBuilder`](schema::SchemaBuilder); the resulting immutable
//! [`Graph`](schema::Graph) knows where every relation is stored. A
//! [`Client`] pairs the graph with a [`Driver`](base::Driver) and a
//! [`Registry`] of hooks, interceptors and privacy policies, and hands out
//! builders:
//!
//! - `client.create("User")`, `create_bulk`, `update`, `update_one`,
//!   `delete`, `delete_one` run the mutation pipeline: defaults, checks,
//!   hooks, policy, one driver write.
//! - `client.query("User")` runs the query pipeline: interceptors, policy,
//!   one driver read, then one batched read per eager-loaded edge.
//! - `client.node(cx, gid)` resolves an opaque global identifier.
//!
//! # Example
//!
//! ```ignore
//! use entgraph::prelude::*;
//!
//! let graph = SchemaBuilder::new()
//!     .entity(EntityType::new("User").field(Field::string("name")).edge(Edge::to("posts", "Post")))
//!     .entity(EntityType::new("Post").field(Field::string("title")).edge(
//!         Edge::from("author", "User").reference("posts").unique(),
//!     ))
//!     .build()?;
//! let driver = Arc::new(MemoryDriver::new(&graph));
//! let client = Client::open(graph, driver)?;
//!
//! let cx = Cx::for_testing();
//! let ann = client.create("User").set("name", "ann").save(&cx);
//! let users = client.query("User").with_edge("posts").all(&cx);
//! ```

mod client;
mod node;
mod registry;

pub use client::{Client, ClientConfig};
pub use registry::Registry;

pub use entgraph_core as base;
pub use entgraph_memory as memory;
pub use entgraph_mutation as mutation;
pub use entgraph_query as query;
pub use entgraph_schema as schema;

pub use entgraph_core::{Cx, Error, Outcome, Result, Value};

/// The names most programs need.
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::{Client, ClientConfig, Registry};
    pub use entgraph_core::{
        Cx, Dialect, Driver, Error, FieldKind, GlobalId, OrderBy, Outcome, Predicate, Result,
        Value, try_outcome, try_result,
    };
    pub use entgraph_memory::{DriverStats, MemoryDriver};
    pub use entgraph_mutation::{
        Mutation, MutationPolicy, MutationValue, Op, hook, on, reject, unless, when,
    };
    pub use entgraph_query::{
        Decision, Entity, QueryPolicy, QueryState, intercept, traverse,
    };
    pub use entgraph_schema::{Edge, EntityType, Field, Graph, GraphConfig, SchemaBuilder, Validator};
}
