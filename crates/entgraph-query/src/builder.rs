//! The query builder and its terminals.

use std::fmt;
use std::sync::Arc;

use entgraph_core::{
    ConfigErrorKind, Cx, Driver, Error, OrderBy, Outcome, Predicate, QuerySpec, Result, Value,
    try_outcome, try_result,
};
use entgraph_schema::{EntityType, Graph, snake_case};

use crate::eager::{self, EagerEdge};
use crate::entity::{Entity, scan_entity};
use crate::interceptor::{InterceptorRegistry, QueryOp, QueryResult, QueryState, Querier};

/// What every query needs to run: the graph, the driver and the
/// interceptor registry.
#[derive(Clone)]
pub struct QueryEnv {
    pub graph: Arc<Graph>,
    pub driver: Arc<dyn Driver>,
    pub interceptors: Arc<InterceptorRegistry>,
}

impl QueryEnv {
    pub fn new(graph: Arc<Graph>, driver: Arc<dyn Driver>) -> Self {
        Self {
            graph,
            driver,
            interceptors: Arc::new(InterceptorRegistry::default()),
        }
    }

    pub fn with_interceptors(mut self, interceptors: Arc<InterceptorRegistry>) -> Self {
        self.interceptors = interceptors;
        self
    }
}

impl fmt::Debug for QueryEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEnv")
            .field("dialect", &self.driver.dialect())
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

/// Fluent query over one entity type.
///
/// Terminals borrow the builder, so one builder can be run several times.
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    env: QueryEnv,
    state: QueryState,
}

impl QueryBuilder {
    pub fn new(env: QueryEnv, type_name: impl Into<String>) -> Self {
        Self {
            env,
            state: QueryState::new(type_name),
        }
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn env(&self) -> &QueryEnv {
        &self.env
    }

    /// Add a predicate; predicates are AND-ed.
    pub fn where_(mut self, pred: Predicate) -> Self {
        self.state.predicates.push(pred);
        self
    }

    pub fn order(mut self, order: OrderBy) -> Self {
        self.state.order.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.state.offset = Some(offset);
        self
    }

    /// `SELECT DISTINCT`.
    pub fn unique(mut self, unique: bool) -> Self {
        self.state.unique = unique;
        self
    }

    /// Project only the named fields (the id is always included).
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.select = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Also read FK columns, hidden ones included.
    pub fn with_fks(mut self) -> Self {
        self.state.with_fks = true;
        self
    }

    /// Eager-load `edge` on every returned node.
    pub fn with_edge(mut self, edge: impl Into<String>) -> Self {
        self.state.eager.push(EagerEdge::new(edge));
        self
    }

    /// Eager-load `edge`, shaping the neighbor query with `configure`.
    pub fn with_edge_configured<F>(mut self, edge: impl Into<String>, configure: F) -> Self
    where
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        self.state
            .eager
            .push(EagerEdge::new(edge).configure(configure));
        self
    }

    /// A query over the neighbors of the nodes this query matches.
    pub fn query_edge(&self, edge: &str) -> Result<QueryBuilder> {
        let graph = &self.env.graph;
        let target = graph.edge(&self.state.type_name, edge)?.target.clone();
        let back = graph.step(&self.state.type_name, edge)?.reversed();
        let pred = if self.state.predicates.is_empty() {
            Predicate::has_neighbors(back)
        } else {
            Predicate::has_neighbors_with(back, Predicate::and(self.state.predicates.clone()))
        };
        Ok(QueryBuilder::new(self.env.clone(), target).where_(pred))
    }

    fn label(&self) -> String {
        snake_case(&self.state.type_name)
    }

    /// Run `op` through the interceptor chain.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(type_name = %self.state.type_name))]
    fn run(&self, cx: &Cx, op: QueryOp) -> Outcome<QueryResult, Error> {
        let mut state = self.state.clone();
        state.op = op;
        match op {
            QueryOp::First | QueryOp::FirstId | QueryOp::Exist => state.limit = Some(1),
            QueryOp::Only | QueryOp::OnlyId => state.limit = Some(2),
            QueryOp::All | QueryOp::Count | QueryOp::Ids => {}
        }
        let env = self.env.clone();
        let base: Querier =
            Arc::new(move |cx: &Cx, state: &mut QueryState| execute(cx, &env, state));
        let querier = self.env.interceptors.compose(&state.type_name, base);
        querier(cx, &mut state)
    }

    pub fn all(&self, cx: &Cx) -> Outcome<Vec<Entity>, Error> {
        let result = try_outcome!(self.run(cx, QueryOp::All));
        Outcome::Ok(try_result!(result.into_entities(QueryOp::All)))
    }

    /// The first node, or `NotFound`.
    pub fn first(&self, cx: &Cx) -> Outcome<Entity, Error> {
        let result = try_outcome!(self.run(cx, QueryOp::First));
        let nodes = try_result!(result.into_entities(QueryOp::First));
        match nodes.into_iter().next() {
            Some(node) => Outcome::Ok(node),
            None => Outcome::Err(Error::not_found(self.label())),
        }
    }

    pub fn first_id(&self, cx: &Cx) -> Outcome<Value, Error> {
        let result = try_outcome!(self.run(cx, QueryOp::FirstId));
        let ids = try_result!(result.into_ids(QueryOp::FirstId));
        match ids.into_iter().next() {
            Some(id) => Outcome::Ok(id),
            None => Outcome::Err(Error::not_found(self.label())),
        }
    }

    /// Exactly one node: `NotFound` for none, `NotSingular` for several.
    pub fn only(&self, cx: &Cx) -> Outcome<Entity, Error> {
        let result = try_outcome!(self.run(cx, QueryOp::Only));
        let nodes = try_result!(result.into_entities(QueryOp::Only));
        Outcome::Ok(try_result!(exactly_one(nodes, &self.label())))
    }

    pub fn only_id(&self, cx: &Cx) -> Outcome<Value, Error> {
        let result = try_outcome!(self.run(cx, QueryOp::OnlyId));
        let ids = try_result!(result.into_ids(QueryOp::OnlyId));
        Outcome::Ok(try_result!(exactly_one(ids, &self.label())))
    }

    pub fn count(&self, cx: &Cx) -> Outcome<u64, Error> {
        let result = try_outcome!(self.run(cx, QueryOp::Count));
        Outcome::Ok(try_result!(result.into_count(QueryOp::Count)))
    }

    pub fn exist(&self, cx: &Cx) -> Outcome<bool, Error> {
        let result = try_outcome!(self.run(cx, QueryOp::Exist));
        let ids = try_result!(result.into_ids(QueryOp::Exist));
        Outcome::Ok(!ids.is_empty())
    }

    pub fn ids(&self, cx: &Cx) -> Outcome<Vec<Value>, Error> {
        let result = try_outcome!(self.run(cx, QueryOp::Ids));
        Outcome::Ok(try_result!(result.into_ids(QueryOp::Ids)))
    }
}

fn exactly_one<T>(items: Vec<T>, label: &str) -> Result<T> {
    let mut iter = items.into_iter();
    match (iter.next(), iter.next()) {
        (Some(item), None) => Ok(item),
        (None, _) => Err(Error::not_found(label)),
        (Some(_), Some(_)) => Err(Error::not_singular(label)),
    }
}

/// The base querier: one driver round trip, then eager-loading.
fn execute(cx: &Cx, env: &QueryEnv, state: &mut QueryState) -> Outcome<QueryResult, Error> {
    let ty = try_result!(env.graph.entity(&state.type_name));
    let mut spec = try_result!(query_spec(&env.graph, ty, state));
    match state.op {
        QueryOp::Count => {
            let n = try_outcome!(env.driver.count_nodes(cx, &spec));
            Outcome::Ok(QueryResult::Count(n))
        }
        QueryOp::FirstId | QueryOp::OnlyId | QueryOp::Exist | QueryOp::Ids => {
            let Some(id) = ty.id_column() else {
                return Outcome::Err(Error::config(
                    ConfigErrorKind::MissingIdentifier,
                    format!("{} has no identifier field", ty.name),
                ));
            };
            spec.columns = vec![id.to_string()];
            let rows = try_outcome!(env.driver.query_nodes(cx, &spec));
            let ids = rows
                .iter()
                .filter_map(|row| row.get(id).filter(|v| !v.is_null()).cloned())
                .collect();
            Outcome::Ok(QueryResult::Ids(ids))
        }
        QueryOp::All | QueryOp::First | QueryOp::Only => {
            let rows = try_outcome!(env.driver.query_nodes(cx, &spec));
            let mut nodes = Vec::with_capacity(rows.len());
            for row in &rows {
                nodes.push(try_result!(scan_entity(ty, row)));
            }
            if !nodes.is_empty() && !state.eager.is_empty() {
                try_outcome!(eager::load(cx, env, ty, &mut nodes, &state.eager));
            }
            Outcome::Ok(QueryResult::Entities(nodes))
        }
    }
}

/// Translate the accumulated state into a driver spec.
fn query_spec(graph: &Graph, ty: &EntityType, state: &QueryState) -> Result<QuerySpec> {
    let mut spec = QuerySpec::new(ty.table.clone());
    spec.id_column = ty.id_column().map(str::to_string);
    spec.columns = if state.select.is_empty() {
        ty.columns()
    } else {
        let mut columns: Vec<String> = ty.id_column().map(str::to_string).into_iter().collect();
        for name in &state.select {
            if ty.id.as_ref().is_some_and(|id| &id.name == name) {
                continue;
            }
            let field = ty.get_field(name).ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::Unknown,
                    format!("unknown field {}.{name}", ty.name),
                )
            })?;
            columns.push(field.column.clone());
        }
        columns
    };
    if state.with_fks || eager::needs_local_fks(graph, ty, &state.eager) {
        for fk in &ty.foreign_keys {
            if !spec.columns.contains(&fk.column) {
                spec.columns.push(fk.column.clone());
            }
        }
    }
    if !state.predicates.is_empty() {
        spec.predicate = Some(Predicate::and(state.predicates.clone()));
    }
    spec.order.clone_from(&state.order);
    spec.limit = state.limit;
    spec.offset = state.offset;
    spec.distinct = state.unique;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entgraph_schema::{Edge, Field, SchemaBuilder};

    fn graph() -> Graph {
        SchemaBuilder::new()
            .entity(
                EntityType::new("User")
                    .field(Field::string("name"))
                    .edge(Edge::to("posts", "Post")),
            )
            .entity(
                EntityType::new("Post")
                    .field(Field::string("title"))
                    .edge(Edge::from("author", "User").reference("posts").unique()),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_query_spec_projects_fks_for_local_eager_edges() {
        let graph = graph();
        let post = graph.entity("Post").unwrap();
        let mut state = QueryState::new("Post");
        assert_eq!(query_spec(&graph, post, &state).unwrap().columns, vec!["id", "title"]);
        state.eager.push(EagerEdge::new("author"));
        assert_eq!(
            query_spec(&graph, post, &state).unwrap().columns,
            vec!["id", "title", "user_id"]
        );
    }

    #[test]
    fn test_query_spec_select() {
        let graph = graph();
        let user = graph.entity("User").unwrap();
        let mut state = QueryState::new("User");
        state.select = vec!["name".into()];
        state.predicates.push(Predicate::eq("name", "a"));
        state.unique = true;
        let spec = query_spec(&graph, user, &state).unwrap();
        assert_eq!(spec.columns, vec!["id", "name"]);
        assert!(spec.distinct);
        assert_eq!(spec.predicate, Some(Predicate::eq("name", "a")));

        state.select = vec!["nope".into()];
        assert!(query_spec(&graph, user, &state).is_err());
    }

    #[test]
    fn test_exactly_one() {
        assert_eq!(exactly_one(vec![1], "user").unwrap(), 1);
        assert!(entgraph_core::is_not_found(&exactly_one(Vec::<i32>::new(), "user").unwrap_err()));
        assert!(entgraph_core::is_not_singular(&exactly_one(vec![1, 2], "user").unwrap_err()));
    }
}
