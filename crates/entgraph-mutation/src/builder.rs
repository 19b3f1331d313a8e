//! Create, update and delete builders.
//!
//! Setters record into a [`Mutation`] and never fail on the spot; the first
//! problem (unknown field, unknown edge, setter after execution) is kept and
//! returned by `save`/`exec` before anything runs.

use std::sync::Arc;

use entgraph_core::{
    ConfigErrorKind, ConflictValue, Cx, DeleteSpec, Error, FkOwner, Outcome, Predicate, Result,
    Value, try_outcome, try_result,
};
use entgraph_query::{Entity, scan_entity};

use crate::hook::{MutationValue, Mutator};
use crate::mutation::{Mutation, Op};
use crate::pipeline::{
    MutationEnv, apply_defaults, check_create, check_update, create_spec, entity_from_mutation,
    insert_columns, read_id, update_spec, wrap_constraint,
};
use crate::upsert::{Resolution, Upsert, add_value, set_value};

/// Builder state shared by every mutation kind.
#[derive(Debug)]
pub(crate) struct Draft {
    pub(crate) env: MutationEnv,
    pub(crate) mutation: Mutation,
    pending: Option<Error>,
}

impl Draft {
    fn new(env: MutationEnv, type_name: impl Into<String>, op: Op) -> Self {
        Self {
            env,
            mutation: Mutation::new(type_name, op),
            pending: None,
        }
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            if self.pending.is_none() {
                tracing::debug!(type_name = self.mutation.type_name(), error = %e, "Setter rejected");
                self.pending = Some(e);
            }
        }
    }

    fn set(&mut self, name: &str, value: Value) {
        let result = self.try_set(name, value);
        self.record(result);
    }

    fn try_set(&mut self, name: &str, value: Value) -> Result<()> {
        let ty = self.env.graph().entity(self.mutation.type_name())?;
        if ty.id.as_ref().is_some_and(|id| id.name == name) {
            if self.mutation.op() == Op::Create {
                return self.mutation.set_id(value);
            }
            return Err(Error::validation(
                name,
                format!("field \"{}.{name}\" is immutable", ty.name),
            ));
        }
        if ty.get_field(name).is_none() {
            return Err(unknown_field(&ty.name, name));
        }
        self.mutation.set_field(name, value)
    }

    fn field_op(&mut self, name: &str, op: impl FnOnce(&mut Mutation) -> Result<()>) {
        let result = match self.env.graph().entity(self.mutation.type_name()) {
            Ok(ty) if ty.get_field(name).is_none() => Err(unknown_field(&ty.name, name)),
            Ok(_) => op(&mut self.mutation),
            Err(e) => Err(e),
        };
        self.record(result);
    }

    /// The bound field of a locally stored edge, if it has one.
    fn bound_field(&self, edge: &str) -> Result<(bool, Option<String>)> {
        let e = self.env.graph().edge(self.mutation.type_name(), edge)?;
        let field = e
            .relation
            .as_ref()
            .filter(|rel| rel.owner == FkOwner::Local)
            .and_then(|rel| rel.field.clone());
        Ok((e.unique, field))
    }

    fn add_edge(&mut self, edge: &str, ids: Vec<Value>) {
        let result = self.try_add_edge(edge, ids);
        self.record(result);
    }

    fn try_add_edge(&mut self, edge: &str, ids: Vec<Value>) -> Result<()> {
        let (unique, field) = self.bound_field(edge)?;
        if !unique {
            return self.mutation.add_edge_ids(edge, ids);
        }
        let Some(id) = ids.into_iter().last() else {
            return Ok(());
        };
        if let Some(field) = field {
            self.mutation.set_field(field, id.clone())?;
        }
        self.mutation.set_edge_id(edge, id)
    }

    fn remove_edge(&mut self, edge: &str, ids: Vec<Value>) {
        let result = self
            .bound_field(edge)
            .and_then(|_| self.mutation.remove_edge_ids(edge, ids));
        self.record(result);
    }

    fn clear_edge(&mut self, edge: &str) {
        let result = self.bound_field(edge).and_then(|(_, field)| {
            if let Some(field) = field {
                self.mutation.clear_field(field)?;
            }
            self.mutation.clear_edge(edge)
        });
        self.record(result);
    }

    fn where_(&mut self, pred: Predicate) {
        let result = self.mutation.where_(pred);
        self.record(result);
    }

    /// Surface the pending setter error, apply defaults and run the
    /// pre-chain checks.
    pub(crate) fn prepare(&mut self) -> Result<()> {
        self.mutation = self.prepared()?;
        Ok(())
    }

    /// Like [`Draft::prepare`], but defaults land on a copy; the builder's
    /// own mutation is left as it was.
    pub(crate) fn prepared(&mut self) -> Result<Mutation> {
        if let Some(e) = self.pending.take() {
            return Err(e);
        }
        if self.mutation.is_done() {
            return Err(Error::Custom("mutation already executed".to_string()));
        }
        let graph = Arc::clone(self.env.graph());
        let ty = graph.entity(self.mutation.type_name())?;
        let mut mutation = self.mutation.clone();
        apply_defaults(ty, &mut mutation)?;
        match mutation.op() {
            Op::Create => check_create(&graph, ty, &mutation, self.env.dialect())?,
            Op::Update | Op::UpdateOne => check_update(ty, &mutation)?,
            Op::Delete | Op::DeleteOne => {}
        }
        Ok(mutation)
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, cx, base),
        fields(type_name = %self.mutation.type_name(), op = %self.mutation.op())
    )]
    fn run(&mut self, cx: &Cx, base: Mutator) -> Outcome<MutationValue, Error> {
        try_result!(self.prepare());
        let mutator = self.env.hooks.compose(self.mutation.type_name(), base);
        mutator(cx, &mut self.mutation)
    }
}

fn unknown_field(type_name: &str, name: &str) -> Error {
    Error::config(
        ConfigErrorKind::Unknown,
        format!("unknown field {type_name}.{name}"),
    )
}

fn expect_node(value: MutationValue) -> Result<Entity> {
    match value {
        MutationValue::Node(node) => Ok(node),
        MutationValue::Affected(_) => Err(Error::config(
            ConfigErrorKind::Pipeline,
            "mutator returned an affected count where a node was expected",
        )),
    }
}

fn expect_affected(value: MutationValue) -> Result<u64> {
    match value {
        MutationValue::Affected(n) => Ok(n),
        MutationValue::Node(_) => Err(Error::config(
            ConfigErrorKind::Pipeline,
            "mutator returned a node where an affected count was expected",
        )),
    }
}

fn id_predicate(env: &MutationEnv, m: &Mutation) -> Result<Vec<Predicate>> {
    let ty = env.graph().entity(m.type_name())?;
    let mut preds = Vec::new();
    if m.op() == Op::DeleteOne {
        let (Some(column), Some(id)) = (ty.id_column(), m.id()) else {
            return Err(Error::config(
                ConfigErrorKind::MissingIdentifier,
                format!("delete of one {} without an id", ty.name),
            ));
        };
        preds.push(Predicate::eq(column, id.clone()));
    }
    preds.extend(m.predicates().iter().cloned());
    Ok(preds)
}

pub(crate) fn create_base(env: MutationEnv, upsert: Option<Upsert>) -> Mutator {
    Arc::new(move |cx: &Cx, m: &mut Mutation| {
        let graph = env.graph();
        let ty = try_result!(graph.entity(m.type_name()));
        try_result!(check_create(graph, ty, m, env.dialect()));
        let mut spec = try_result!(create_spec(graph, ty, m));
        if let Some(upsert) = &upsert {
            spec.on_conflict = Some(try_result!(upsert.resolve(ty, &insert_columns(&spec))));
        }
        try_outcome!(wrap_constraint(env.driver().create_node(cx, &mut spec)));
        m.finish(read_id(ty, &spec));
        Outcome::Ok(MutationValue::Node(entity_from_mutation(graph, ty, m)))
    })
}

fn update_base(env: MutationEnv) -> Mutator {
    Arc::new(move |cx: &Cx, m: &mut Mutation| {
        let graph = env.graph();
        let ty = try_result!(graph.entity(m.type_name()));
        try_result!(check_update(ty, m));
        let spec = try_result!(update_spec(graph, ty, m));
        match m.op() {
            Op::UpdateOne => {
                let row = try_outcome!(wrap_constraint(env.driver().update_node(cx, &spec)));
                let Some(row) = row else {
                    return Outcome::Err(Error::not_found(ty.label()));
                };
                let node = try_result!(scan_entity(ty, &row));
                m.finish(None);
                Outcome::Ok(MutationValue::Node(node))
            }
            _ if spec.is_empty() => {
                m.finish(None);
                Outcome::Ok(MutationValue::Affected(0))
            }
            _ => {
                let n = try_outcome!(wrap_constraint(env.driver().update_nodes(cx, &spec)));
                m.finish(None);
                Outcome::Ok(MutationValue::Affected(n))
            }
        }
    })
}

fn delete_base(env: MutationEnv) -> Mutator {
    Arc::new(move |cx: &Cx, m: &mut Mutation| {
        let ty = try_result!(env.graph().entity(m.type_name()));
        let mut spec = DeleteSpec::new(ty.table.clone());
        let preds = try_result!(id_predicate(&env, m));
        if !preds.is_empty() {
            spec.predicate = Some(Predicate::and(preds));
        }
        let n = try_outcome!(wrap_constraint(env.driver().delete_nodes(cx, &spec)));
        m.finish(None);
        Outcome::Ok(MutationValue::Affected(n))
    })
}

/// Builder for creating one node.
#[derive(Debug)]
pub struct CreateBuilder {
    pub(crate) draft: Draft,
}

impl CreateBuilder {
    pub fn new(env: MutationEnv, type_name: impl Into<String>) -> Self {
        Self {
            draft: Draft::new(env, type_name, Op::Create),
        }
    }

    pub fn mutation(&self) -> &Mutation {
        &self.draft.mutation
    }

    /// Set a field, or the identifier when `field` names it.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.draft.set(field, value.into());
        self
    }

    /// Set a field only when `value` is `Some`.
    pub fn set_opt<V: Into<Value>>(&mut self, field: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.draft.set(field, value.into());
        }
        self
    }

    /// Point a unique edge at `id`.
    pub fn set_edge_id(&mut self, edge: &str, id: impl Into<Value>) -> &mut Self {
        self.draft.add_edge(edge, vec![id.into()]);
        self
    }

    pub fn add_edge_ids<I, V>(&mut self, edge: &str, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.draft.add_edge(edge, ids.into_iter().map(Into::into).collect());
        self
    }

    /// Turn the insert into an upsert. At least one directive is required.
    pub fn on_conflict(&mut self) -> UpsertOne<'_> {
        UpsertOne {
            builder: self,
            upsert: Upsert::new(),
        }
    }

    pub fn save(&mut self, cx: &Cx) -> Outcome<Entity, Error> {
        self.save_with(cx, None)
    }

    pub fn exec(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.save(cx));
        Outcome::Ok(())
    }

    fn save_with(&mut self, cx: &Cx, upsert: Option<Upsert>) -> Outcome<Entity, Error> {
        if let Some(upsert) = &upsert {
            try_result!(upsert.ensure_directives(self.draft.mutation.type_name()));
        }
        let base = create_base(self.draft.env.clone(), upsert);
        let value = try_outcome!(self.draft.run(cx, base));
        Outcome::Ok(try_result!(expect_node(value)))
    }
}

/// Conflict handling for a single create.
#[must_use]
pub struct UpsertOne<'a> {
    builder: &'a mut CreateBuilder,
    upsert: Upsert,
}

impl UpsertOne<'_> {
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.upsert = self.upsert.columns(columns);
        self
    }

    pub fn constraint(mut self, name: impl Into<String>) -> Self {
        self.upsert = self.upsert.constraint(name);
        self
    }

    pub fn update_new_values(mut self) -> Self {
        self.upsert = self.upsert.resolve_with(Resolution::UpdateNewValues);
        self
    }

    pub fn ignore(mut self) -> Self {
        self.upsert = self.upsert.resolve_with(Resolution::Ignore);
        self
    }

    pub fn do_nothing(mut self) -> Self {
        self.upsert = self.upsert.resolve_with(Resolution::DoNothing);
        self
    }

    pub fn update(mut self, column: impl Into<String>, value: ConflictValue) -> Self {
        self.upsert = self.upsert.resolve_with(Resolution::Custom(column.into(), value));
        self
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.upsert = self.upsert.resolve_with(set_value(column, value));
        self
    }

    pub fn add(mut self, column: impl Into<String>, delta: impl Into<Value>) -> Self {
        self.upsert = self.upsert.resolve_with(add_value(column, delta));
        self
    }

    pub fn exec(self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.builder.save_with(cx, Some(self.upsert)));
        Outcome::Ok(())
    }

    /// The id of the inserted or updated row. With `do_nothing` and a
    /// conflict no id comes back and this is `NotFound`.
    pub fn id(self, cx: &Cx) -> Outcome<Value, Error> {
        let label = self.builder.draft.mutation.type_name().to_string();
        let node = try_outcome!(self.builder.save_with(cx, Some(self.upsert)));
        match node.id {
            Some(id) => Outcome::Ok(id),
            None => Outcome::Err(Error::not_found(entgraph_schema::snake_case(&label))),
        }
    }
}

/// Builder for updating every node matching its predicates.
#[derive(Debug)]
pub struct UpdateBuilder {
    draft: Draft,
}

/// Builder for updating one node by id.
#[derive(Debug)]
pub struct UpdateOneBuilder {
    draft: Draft,
}

macro_rules! update_setters {
    ($builder:ty) => {
        impl $builder {
            pub fn mutation(&self) -> &Mutation {
                &self.draft.mutation
            }

            pub fn set(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
                self.draft.set(field, value.into());
                self
            }

            pub fn set_opt<V: Into<Value>>(&mut self, field: &str, value: Option<V>) -> &mut Self {
                if let Some(value) = value {
                    self.draft.set(field, value.into());
                }
                self
            }

            /// Increment a numeric field.
            pub fn add(&mut self, field: &str, delta: impl Into<Value>) -> &mut Self {
                let delta = delta.into();
                self.draft.field_op(field, |m| m.add_field(field, delta));
                self
            }

            /// Set a nillable or optional field to NULL.
            pub fn clear(&mut self, field: &str) -> &mut Self {
                self.draft.field_op(field, |m| m.clear_field(field));
                self
            }

            pub fn set_edge_id(&mut self, edge: &str, id: impl Into<Value>) -> &mut Self {
                self.draft.add_edge(edge, vec![id.into()]);
                self
            }

            pub fn add_edge_ids<I, V>(&mut self, edge: &str, ids: I) -> &mut Self
            where
                I: IntoIterator<Item = V>,
                V: Into<Value>,
            {
                self.draft.add_edge(edge, ids.into_iter().map(Into::into).collect());
                self
            }

            pub fn remove_edge_ids<I, V>(&mut self, edge: &str, ids: I) -> &mut Self
            where
                I: IntoIterator<Item = V>,
                V: Into<Value>,
            {
                self.draft.remove_edge(edge, ids.into_iter().map(Into::into).collect());
                self
            }

            pub fn clear_edge(&mut self, edge: &str) -> &mut Self {
                self.draft.clear_edge(edge);
                self
            }

            pub fn where_(&mut self, pred: Predicate) -> &mut Self {
                self.draft.where_(pred);
                self
            }
        }
    };
}

update_setters!(UpdateBuilder);
update_setters!(UpdateOneBuilder);

impl UpdateBuilder {
    pub fn new(env: MutationEnv, type_name: impl Into<String>) -> Self {
        Self {
            draft: Draft::new(env, type_name, Op::Update),
        }
    }

    /// Number of rows updated. Nothing to write means no round trip and 0.
    pub fn save(&mut self, cx: &Cx) -> Outcome<u64, Error> {
        let base = update_base(self.draft.env.clone());
        let value = try_outcome!(self.draft.run(cx, base));
        Outcome::Ok(try_result!(expect_affected(value)))
    }

    pub fn exec(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.save(cx));
        Outcome::Ok(())
    }
}

impl UpdateOneBuilder {
    pub fn new(env: MutationEnv, type_name: impl Into<String>, id: impl Into<Value>) -> Self {
        let mut draft = Draft::new(env, type_name, Op::UpdateOne);
        let result = draft.mutation.set_id(id.into());
        draft.record(result);
        Self { draft }
    }

    /// The updated node as stored, `NotFound` when the id matches nothing.
    pub fn save(&mut self, cx: &Cx) -> Outcome<Entity, Error> {
        let base = update_base(self.draft.env.clone());
        let value = try_outcome!(self.draft.run(cx, base));
        Outcome::Ok(try_result!(expect_node(value)))
    }

    pub fn exec(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.save(cx));
        Outcome::Ok(())
    }
}

/// Builder for deleting every node matching its predicates.
#[derive(Debug)]
pub struct DeleteBuilder {
    draft: Draft,
}

impl DeleteBuilder {
    pub fn new(env: MutationEnv, type_name: impl Into<String>) -> Self {
        Self {
            draft: Draft::new(env, type_name, Op::Delete),
        }
    }

    pub fn mutation(&self) -> &Mutation {
        &self.draft.mutation
    }

    pub fn where_(&mut self, pred: Predicate) -> &mut Self {
        self.draft.where_(pred);
        self
    }

    /// Number of rows deleted.
    pub fn exec(&mut self, cx: &Cx) -> Outcome<u64, Error> {
        let base = delete_base(self.draft.env.clone());
        let value = try_outcome!(self.draft.run(cx, base));
        Outcome::Ok(try_result!(expect_affected(value)))
    }
}

/// Builder for deleting one node by id.
#[derive(Debug)]
pub struct DeleteOneBuilder {
    draft: Draft,
}

impl DeleteOneBuilder {
    pub fn new(env: MutationEnv, type_name: impl Into<String>, id: impl Into<Value>) -> Self {
        let mut draft = Draft::new(env, type_name, Op::DeleteOne);
        let result = draft.mutation.set_id(id.into());
        draft.record(result);
        Self { draft }
    }

    pub fn mutation(&self) -> &Mutation {
        &self.draft.mutation
    }

    pub fn where_(&mut self, pred: Predicate) -> &mut Self {
        self.draft.where_(pred);
        self
    }

    /// `NotFound` when no row was deleted.
    pub fn exec(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let base = delete_base(self.draft.env.clone());
        let value = try_outcome!(self.draft.run(cx, base));
        if try_result!(expect_affected(value)) == 0 {
            let label = entgraph_schema::snake_case(self.draft.mutation.type_name());
            return Outcome::Err(Error::not_found(label));
        }
        Outcome::Ok(())
    }
}
