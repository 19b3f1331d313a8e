//! Query interceptors.
//!
//! A [`Querier`] executes a [`QueryState`]; an [`Interceptor`] wraps one
//! querier in another. Interceptors registered `[A, B]` are folded
//! right-to-left into `A(B(base))`, so `A` sees the query first. A type's
//! [`QueryPolicy`] wraps the base querier directly, inside every
//! interceptor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use entgraph_core::{Cx, Error, OrderBy, Outcome, Predicate, Value};

use crate::eager::EagerEdge;
use crate::entity::Entity;
use crate::privacy::QueryPolicy;

/// Terminal operation a query was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    All,
    First,
    FirstId,
    Only,
    OnlyId,
    Count,
    Exist,
    Ids,
}

impl QueryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            QueryOp::All => "all",
            QueryOp::First => "first",
            QueryOp::FirstId => "first_id",
            QueryOp::Only => "only",
            QueryOp::OnlyId => "only_id",
            QueryOp::Count => "count",
            QueryOp::Exist => "exist",
            QueryOp::Ids => "ids",
        }
    }

    /// True for terminals returning full entities (and eager-loading).
    pub const fn loads_entities(self) -> bool {
        matches!(self, QueryOp::All | QueryOp::First | QueryOp::Only)
    }
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a query accumulated, as seen by interceptors and rules.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub type_name: String,
    pub op: QueryOp,
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub unique: bool,
    /// Field names to project; empty selects every field.
    pub select: Vec<String>,
    /// Project FK columns even when no eager edge needs them.
    pub with_fks: bool,
    pub eager: Vec<EagerEdge>,
}

impl QueryState {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            op: QueryOp::All,
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            unique: false,
            select: Vec::new(),
            with_fks: false,
            eager: Vec::new(),
        }
    }

    pub fn add_predicate(&mut self, pred: Predicate) {
        self.predicates.push(pred);
    }
}

/// What a querier produced.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Entities(Vec<Entity>),
    Ids(Vec<Value>),
    Count(u64),
}

impl QueryResult {
    fn kind(&self) -> &'static str {
        match self {
            QueryResult::Entities(_) => "entities",
            QueryResult::Ids(_) => "ids",
            QueryResult::Count(_) => "count",
        }
    }

    fn mismatch(&self, op: QueryOp) -> Error {
        Error::config(
            entgraph_core::ConfigErrorKind::Pipeline,
            format!("querier returned {} for a {op} query", self.kind()),
        )
    }

    pub fn into_entities(self, op: QueryOp) -> Result<Vec<Entity>, Error> {
        match self {
            QueryResult::Entities(nodes) => Ok(nodes),
            other => Err(other.mismatch(op)),
        }
    }

    pub fn into_ids(self, op: QueryOp) -> Result<Vec<Value>, Error> {
        match self {
            QueryResult::Ids(ids) => Ok(ids),
            other => Err(other.mismatch(op)),
        }
    }

    pub fn into_count(self, op: QueryOp) -> Result<u64, Error> {
        match self {
            QueryResult::Count(n) => Ok(n),
            other => Err(other.mismatch(op)),
        }
    }
}

pub type Querier = Arc<dyn Fn(&Cx, &mut QueryState) -> Outcome<QueryResult, Error> + Send + Sync>;

pub type Interceptor = Arc<dyn Fn(Querier) -> Querier + Send + Sync>;

/// An interceptor from a function that receives the next querier.
pub fn intercept<F>(f: F) -> Interceptor
where
    F: Fn(&Cx, &mut QueryState, &Querier) -> Outcome<QueryResult, Error> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: Querier| {
        let f = Arc::clone(&f);
        let querier: Querier =
            Arc::new(move |cx: &Cx, state: &mut QueryState| f(cx, state, &next));
        querier
    })
}

/// An interceptor that adjusts the query before it runs, e.g. to add a
/// tenant filter.
pub fn traverse<F>(f: F) -> Interceptor
where
    F: Fn(&Cx, &mut QueryState) -> Result<(), Error> + Send + Sync + 'static,
{
    intercept(move |cx, state, next| {
        if let Err(e) = f(cx, state) {
            return Outcome::Err(e);
        }
        next(cx, state)
    })
}

/// Interceptors and read policies per entity type.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    global: Vec<Interceptor>,
    by_type: HashMap<String, Vec<Interceptor>>,
    policies: HashMap<String, QueryPolicy>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interceptor for every type. Global interceptors wrap
    /// type-specific ones.
    pub fn intercept_all(mut self, interceptor: Interceptor) -> Self {
        self.global.push(interceptor);
        self
    }

    pub fn intercept(mut self, type_name: impl Into<String>, interceptor: Interceptor) -> Self {
        self.by_type
            .entry(type_name.into())
            .or_default()
            .push(interceptor);
        self
    }

    pub fn policy(mut self, type_name: impl Into<String>, policy: QueryPolicy) -> Self {
        self.policies.insert(type_name.into(), policy);
        self
    }

    pub fn policy_for(&self, type_name: &str) -> Option<&QueryPolicy> {
        self.policies.get(type_name)
    }

    /// Number of interceptors applied to `type_name`.
    pub fn chain_len(&self, type_name: &str) -> usize {
        self.global.len() + self.by_type.get(type_name).map_or(0, Vec::len)
    }

    /// Fold the chain for `type_name` around `base`.
    pub fn compose(&self, type_name: &str, base: Querier) -> Querier {
        let mut querier = match self.policies.get(type_name) {
            Some(policy) if !policy.is_empty() => with_policy(policy.clone(), base),
            _ => base,
        };
        let chain: Vec<&Interceptor> = self
            .global
            .iter()
            .chain(self.by_type.get(type_name).into_iter().flatten())
            .collect();
        for interceptor in chain.into_iter().rev() {
            querier = interceptor(querier);
        }
        querier
    }
}

impl fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("global", &self.global.len())
            .field("types", &self.by_type.keys().collect::<Vec<_>>())
            .field("policies", &self.policies.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn with_policy(policy: QueryPolicy, next: Querier) -> Querier {
    Arc::new(move |cx: &Cx, state: &mut QueryState| {
        if let Err(e) = policy.eval(cx, state) {
            tracing::debug!(type_name = %state.type_name, op = %state.op, "Query denied by policy");
            return Outcome::Err(e);
        }
        next(cx, state)
    })
}
