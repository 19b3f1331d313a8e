//! The eager-loading engine.
//!
//! Each declared edge costs one batched neighbor query regardless of how many
//! parents were read (two for join-table edges: the join rows, then the
//! neighbors). The strategy follows which table stores the relation's FK:
//!
//! - `Local`: parents carry the FK; fetch targets by distinct FK values.
//! - `Remote`: targets carry the FK; fetch targets by parent ids and group
//!   them by the FK read back.
//! - `JoinTable`: read join rows by parent ids, then fetch the distinct
//!   target ids.
//!
//! Neighbor queries run through the target type's interceptors, so read
//! policies apply to loaded edges too.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use entgraph_core::{
    ConfigErrorKind, Cx, Error, FkOwner, Outcome, Predicate, QuerySpec, Relation, Value,
    try_outcome, try_result,
};
use entgraph_schema::{EntityType, Graph};

use crate::builder::{QueryBuilder, QueryEnv};
use crate::entity::Entity;

pub type Configure = Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>;

/// One `with_edge` declaration.
#[derive(Clone)]
pub struct EagerEdge {
    pub edge: String,
    pub configure: Option<Configure>,
}

impl EagerEdge {
    pub fn new(edge: impl Into<String>) -> Self {
        Self {
            edge: edge.into(),
            configure: None,
        }
    }

    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        self.configure = Some(Arc::new(configure));
        self
    }
}

impl fmt::Debug for EagerEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerEdge")
            .field("edge", &self.edge)
            .field("configured", &self.configure.is_some())
            .finish()
    }
}

/// True when a declared edge reads its FK from the parent rows.
pub(crate) fn needs_local_fks(graph: &Graph, ty: &EntityType, eager: &[EagerEdge]) -> bool {
    eager.iter().any(|e| {
        graph
            .relation(&ty.name, &e.edge)
            .is_ok_and(|rel| rel.owner == FkOwner::Local)
    })
}

/// Load every declared edge onto `nodes`, in declaration order.
pub(crate) fn load(
    cx: &Cx,
    env: &QueryEnv,
    ty: &EntityType,
    nodes: &mut [Entity],
    eager: &[EagerEdge],
) -> Outcome<(), Error> {
    for decl in eager {
        let edge = try_result!(env.graph.edge(&ty.name, &decl.edge));
        let rel = try_result!(env.graph.relation(&ty.name, &decl.edge));
        let target = try_result!(env.graph.entity(&edge.target));
        let mut neighbors = QueryBuilder::new(env.clone(), target.name.clone());
        if let Some(configure) = &decl.configure {
            neighbors = configure(neighbors);
        }
        for node in nodes.iter_mut() {
            node.set_edge(decl.edge.clone(), Vec::new());
        }
        tracing::debug!(
            type_name = %ty.name,
            edge = %decl.edge,
            kind = %rel.kind,
            parents = nodes.len(),
            "Eager-loading edge"
        );
        let load = Load {
            owner: ty,
            target,
            edge: &decl.edge,
            rel,
        };
        match rel.owner {
            FkOwner::Local => try_outcome!(load.local(cx, nodes, neighbors)),
            FkOwner::Remote => try_outcome!(load.remote(cx, nodes, neighbors)),
            FkOwner::JoinTable => try_outcome!(load.join_table(cx, env, nodes, neighbors)),
        }
    }
    Outcome::Ok(())
}

struct Load<'a> {
    owner: &'a EntityType,
    target: &'a EntityType,
    edge: &'a str,
    rel: &'a Relation,
}

impl Load<'_> {
    fn target_id(&self) -> Result<&str, Error> {
        self.target.id_column().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::MissingIdentifier,
                format!("{} has no identifier field", self.target.name),
            )
        })
    }

    fn unexpected(&self, detail: String) -> Error {
        Error::config(
            ConfigErrorKind::UnexpectedForeignKey,
            format!("loading {}.{}: {detail}", self.owner.name, self.edge),
        )
    }

    fn attach(nodes: &mut [Entity], parents: &[usize], edge: &str, neighbor: &Entity) {
        for &i in parents {
            if let Some(node) = nodes.get_mut(i) {
                node.edges
                    .entry(edge.to_string())
                    .or_default()
                    .push(neighbor.clone());
            }
        }
    }

    /// Parents hold the FK.
    fn local(&self, cx: &Cx, nodes: &mut [Entity], neighbors: QueryBuilder) -> Outcome<(), Error> {
        let id_column = try_result!(self.target_id());
        let mut by_fk: HashMap<Value, Vec<usize>> = HashMap::new();
        let mut fks = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            let Some(fk) = node.fk_value(self.rel).filter(|v| !v.is_null()) else {
                continue;
            };
            let parents = by_fk.entry(fk.clone()).or_default();
            if parents.is_empty() {
                fks.push(fk.clone());
            }
            parents.push(i);
        }
        if fks.is_empty() {
            return Outcome::Ok(());
        }
        let found = try_outcome!(neighbors.where_(Predicate::is_in(id_column, fks)).all(cx));
        for neighbor in &found {
            let Some(parents) = neighbor.id.as_ref().and_then(|id| by_fk.get(id)) else {
                return Outcome::Err(self.unexpected(format!(
                    "{} {:?} is not referenced by any parent",
                    self.target.name, neighbor.id
                )));
            };
            Self::attach(nodes, parents, self.edge, neighbor);
        }
        Outcome::Ok(())
    }

    /// Neighbors hold the FK.
    fn remote(&self, cx: &Cx, nodes: &mut [Entity], neighbors: QueryBuilder) -> Outcome<(), Error> {
        let Some(fk_column) = self.rel.fk_column() else {
            return Outcome::Err(self.unexpected("relation has no FK column".to_string()));
        };
        let (by_id, ids) = parent_ids(nodes);
        if ids.is_empty() {
            return Outcome::Ok(());
        }
        // The relation as the neighbors see it: the FK is local to them.
        let back = self.rel.reversed(None);
        let found = try_outcome!(
            neighbors
                .with_fks()
                .where_(Predicate::is_in(fk_column, ids))
                .all(cx)
        );
        for neighbor in &found {
            let Some(fk) = neighbor.fk_value(&back).filter(|v| !v.is_null()) else {
                return Outcome::Err(self.unexpected(format!(
                    "foreign-key {fk_column:?} is NULL for {} {:?}",
                    self.target.name, neighbor.id
                )));
            };
            let Some(parents) = by_id.get(fk) else {
                return Outcome::Err(self.unexpected(format!(
                    "foreign-key {fk_column:?} returned {fk} with no matching parent"
                )));
            };
            Self::attach(nodes, parents, self.edge, neighbor);
        }
        Outcome::Ok(())
    }

    /// Join rows first, then the distinct neighbors.
    fn join_table(
        &self,
        cx: &Cx,
        env: &QueryEnv,
        nodes: &mut [Entity],
        neighbors: QueryBuilder,
    ) -> Outcome<(), Error> {
        let Some((this, other)) = self.rel.join_columns() else {
            return Outcome::Err(self.unexpected("relation has no join columns".to_string()));
        };
        let id_column = try_result!(self.target_id());
        let (by_id, ids) = parent_ids(nodes);
        if ids.is_empty() {
            return Outcome::Ok(());
        }
        let mut spec = QuerySpec::new(self.rel.table.clone());
        spec.columns = vec![this.to_string(), other.to_string()];
        spec.predicate = Some(Predicate::is_in(this, ids));
        let rows = try_outcome!(env.driver.query_nodes(cx, &spec));

        let target_scan = self.target.id_kind().map(|kind| kind.scan_target());
        let mut by_target: HashMap<Value, Vec<usize>> = HashMap::new();
        let mut targets = Vec::new();
        for row in &rows {
            let (Some(from), Some(to)) = (row.get(this), row.get(other)) else {
                return Outcome::Err(self.unexpected(format!(
                    "join row of {} lacks {this:?} or {other:?}",
                    self.rel.table
                )));
            };
            let Some(parents) = by_id.get(from) else {
                return Outcome::Err(self.unexpected(format!(
                    "join row references unknown parent {from}"
                )));
            };
            let to = match target_scan.map(|t| t.scan(to)) {
                Some(Ok(Some(v))) => v,
                Some(Err(cause)) => {
                    return Outcome::Err(self.unexpected(format!("join row target: {cause}")));
                }
                Some(Ok(None)) | None => continue,
            };
            let entry = by_target.entry(to.clone()).or_default();
            if entry.is_empty() {
                targets.push(to);
            }
            entry.extend(parents.iter().copied());
        }
        if targets.is_empty() {
            return Outcome::Ok(());
        }
        let found = try_outcome!(neighbors.where_(Predicate::is_in(id_column, targets)).all(cx));
        for neighbor in &found {
            let Some(parents) = neighbor.id.as_ref().and_then(|id| by_target.get(id)) else {
                return Outcome::Err(self.unexpected(format!(
                    "{} {:?} has no join row",
                    self.target.name, neighbor.id
                )));
            };
            Self::attach(nodes, parents, self.edge, neighbor);
        }
        Outcome::Ok(())
    }
}

/// Parent index by id, and the distinct ids in first-seen order.
fn parent_ids(nodes: &[Entity]) -> (HashMap<Value, Vec<usize>>, Vec<Value>) {
    let mut by_id: HashMap<Value, Vec<usize>> = HashMap::new();
    let mut ids = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let Some(id) = &node.id else { continue };
        let entry = by_id.entry(id.clone()).or_default();
        if entry.is_empty() {
            ids.push(id.clone());
        }
        entry.push(i);
    }
    (by_id, ids)
}
