//! The backend driver contract.
//!
//! The pipelines only ever issue the logical operations below; rendering to
//! SQL text is a backend concern. Implementations check `cx.cancel_reason()`
//! before touching storage and report cancellation as
//! `Outcome::Cancelled`.

use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::Error;
use crate::row::Row;
use crate::spec::{BatchCreateSpec, CreateSpec, DeleteSpec, QuerySpec, UpdateSpec};
use crate::value::Value;
use crate::{Cx, Outcome};

/// A relational backend.
pub trait Driver: Send + Sync {
    /// The dialect of the connected backend.
    fn dialect(&self) -> Dialect;

    /// Insert one row. The driver writes a generated identifier back into
    /// `spec.id.value` when it produced one.
    fn create_node(&self, cx: &Cx, spec: &mut CreateSpec) -> Outcome<(), Error>;

    /// Insert several rows in one statement. All-or-nothing: on error no row
    /// is written. Generated identifiers are written back per node.
    fn batch_create(&self, cx: &Cx, spec: &mut BatchCreateSpec) -> Outcome<(), Error>;

    /// Fetch rows matching the spec, projected onto `spec.columns`.
    fn query_nodes(&self, cx: &Cx, spec: &QuerySpec) -> Outcome<Vec<Row>, Error>;

    /// Count rows matching the spec.
    fn count_nodes(&self, cx: &Cx, spec: &QuerySpec) -> Outcome<u64, Error>;

    /// Update the single row matched by `spec.predicate` and return it
    /// projected onto `spec.columns`, or `None` when no row matched.
    fn update_node(&self, cx: &Cx, spec: &UpdateSpec) -> Outcome<Option<Row>, Error>;

    /// Update every matching row, returning the affected count.
    fn update_nodes(&self, cx: &Cx, spec: &UpdateSpec) -> Outcome<u64, Error>;

    /// Delete every matching row, returning the affected count.
    fn delete_nodes(&self, cx: &Cx, spec: &DeleteSpec) -> Outcome<u64, Error>;
}

impl<D: Driver + ?Sized> Driver for Arc<D> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn create_node(&self, cx: &Cx, spec: &mut CreateSpec) -> Outcome<(), Error> {
        (**self).create_node(cx, spec)
    }

    fn batch_create(&self, cx: &Cx, spec: &mut BatchCreateSpec) -> Outcome<(), Error> {
        (**self).batch_create(cx, spec)
    }

    fn query_nodes(&self, cx: &Cx, spec: &QuerySpec) -> Outcome<Vec<Row>, Error> {
        (**self).query_nodes(cx, spec)
    }

    fn count_nodes(&self, cx: &Cx, spec: &QuerySpec) -> Outcome<u64, Error> {
        (**self).count_nodes(cx, spec)
    }

    fn update_node(&self, cx: &Cx, spec: &UpdateSpec) -> Outcome<Option<Row>, Error> {
        (**self).update_node(cx, spec)
    }

    fn update_nodes(&self, cx: &Cx, spec: &UpdateSpec) -> Outcome<u64, Error> {
        (**self).update_nodes(cx, spec)
    }

    fn delete_nodes(&self, cx: &Cx, spec: &DeleteSpec) -> Outcome<u64, Error> {
        (**self).delete_nodes(cx, spec)
    }
}

/// Wraps a driver and logs every call with its rendered SQL.
pub struct DebugDriver {
    inner: Arc<dyn Driver>,
}

impl DebugDriver {
    pub fn new(inner: Arc<dyn Driver>) -> Self {
        Self { inner }
    }

    fn log(&self, op: &str, sql: &str, params: &[Value]) {
        tracing::debug!(
            op,
            dialect = %self.inner.dialect(),
            sql,
            params = params.len(),
            "driver call"
        );
    }
}

impl std::fmt::Debug for DebugDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugDriver")
            .field("dialect", &self.inner.dialect())
            .finish_non_exhaustive()
    }
}

impl Driver for DebugDriver {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn create_node(&self, cx: &Cx, spec: &mut CreateSpec) -> Outcome<(), Error> {
        let (sql, params) = spec.to_sql(self.dialect());
        self.log("create_node", &sql, &params);
        self.inner.create_node(cx, spec)
    }

    fn batch_create(&self, cx: &Cx, spec: &mut BatchCreateSpec) -> Outcome<(), Error> {
        for node in &spec.nodes {
            let (sql, params) = node.to_sql(self.dialect());
            self.log("batch_create", &sql, &params);
        }
        self.inner.batch_create(cx, spec)
    }

    fn query_nodes(&self, cx: &Cx, spec: &QuerySpec) -> Outcome<Vec<Row>, Error> {
        let (sql, params) = spec.to_sql(self.dialect());
        self.log("query_nodes", &sql, &params);
        self.inner.query_nodes(cx, spec)
    }

    fn count_nodes(&self, cx: &Cx, spec: &QuerySpec) -> Outcome<u64, Error> {
        let (sql, params) = spec.to_sql(self.dialect());
        self.log("count_nodes", &format!("SELECT COUNT(*) FROM ({sql})"), &params);
        self.inner.count_nodes(cx, spec)
    }

    fn update_node(&self, cx: &Cx, spec: &UpdateSpec) -> Outcome<Option<Row>, Error> {
        self.log("update_node", &spec.table, &[]);
        self.inner.update_node(cx, spec)
    }

    fn update_nodes(&self, cx: &Cx, spec: &UpdateSpec) -> Outcome<u64, Error> {
        self.log("update_nodes", &spec.table, &[]);
        self.inner.update_nodes(cx, spec)
    }

    fn delete_nodes(&self, cx: &Cx, spec: &DeleteSpec) -> Outcome<u64, Error> {
        let (sql, params) = spec.to_sql(self.dialect());
        self.log("delete_nodes", &sql, &params);
        self.inner.delete_nodes(cx, spec)
    }
}
