//! Bulk creation.
//!
//! Every row runs its own hook chain, but the chains are linked: row `i`'s
//! base mutator records its insert spec and then invokes row `i + 1`'s
//! chain. The last base issues one `batch_create` for all rows. Hooks of
//! every row therefore run before the single write, and ids flow back
//! through each base as the chains unwind.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use entgraph_core::{
    BatchCreateSpec, ConfigErrorKind, CreateSpec, Cx, Error, Outcome, Value, try_outcome,
    try_result,
};
use entgraph_query::Entity;

use crate::builder::CreateBuilder;
use crate::hook::{MutationValue, Mutator};
use crate::mutation::{Mutation, Op};
use crate::pipeline::{
    MutationEnv, check_create, create_spec, entity_from_mutation, insert_columns, lock, read_id,
    wrap_constraint,
};
use crate::upsert::{Resolution, Upsert, add_value, set_value};

type Slots<T> = Arc<Mutex<Vec<Option<T>>>>;

/// Builder for creating many nodes of one type in a single round trip.
#[derive(Debug)]
pub struct CreateBulkBuilder {
    env: MutationEnv,
    builders: Vec<CreateBuilder>,
}

impl CreateBulkBuilder {
    pub fn new(env: MutationEnv, builders: Vec<CreateBuilder>) -> Self {
        Self { env, builders }
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// The row builders, in input order.
    pub fn builders(&self) -> &[CreateBuilder] {
        &self.builders
    }

    /// Mutable access to the rows, e.g. to fix one after a failed save.
    pub fn builders_mut(&mut self) -> &mut [CreateBuilder] {
        &mut self.builders
    }

    pub fn on_conflict(&mut self) -> UpsertBulk<'_> {
        UpsertBulk {
            bulk: self,
            upsert: Upsert::new(),
        }
    }

    /// Created nodes in input order. All or nothing: on failure no row is
    /// written and no builder receives an id. Every hook must call the next
    /// mutator; a hook that returns early fails the whole batch.
    pub fn save(&mut self, cx: &Cx) -> Outcome<Vec<Entity>, Error> {
        self.save_with(cx, None)
    }

    pub fn exec(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.save(cx));
        Outcome::Ok(())
    }

    fn save_with(&mut self, cx: &Cx, upsert: Option<Upsert>) -> Outcome<Vec<Entity>, Error> {
        let Some(first) = self.builders.first() else {
            return Outcome::Ok(Vec::new());
        };
        let type_name = first.mutation().type_name().to_string();
        if let Some(b) = self
            .builders
            .iter()
            .find(|b| b.mutation().type_name() != type_name)
        {
            return Outcome::Err(Error::Custom(format!(
                "bulk create mixes {type_name} and {}",
                b.mutation().type_name()
            )));
        }
        if let Some(upsert) = &upsert {
            try_result!(upsert.ensure_directives(&type_name));
        }
        let mut prepared = Vec::with_capacity(self.builders.len());
        for builder in &mut self.builders {
            prepared.push(try_result!(builder.draft.prepared()));
        }
        for (builder, mutation) in self.builders.iter_mut().zip(prepared) {
            builder.draft.mutation = mutation;
        }

        let n = self.builders.len();
        tracing::debug!(type_name = %type_name, rows = n, "Executing bulk create");
        let slots: Slots<Mutation> = Arc::new(Mutex::new(
            self.builders
                .iter_mut()
                .map(|b| {
                    let placeholder = Mutation::new(type_name.clone(), Op::Create);
                    Some(mem::replace(&mut b.draft.mutation, placeholder))
                })
                .collect(),
        ));
        let specs: Slots<CreateSpec> = Arc::new(Mutex::new(vec![None; n]));
        let written = Arc::new(AtomicBool::new(false));

        let mut next: Option<Mutator> = None;
        for i in (0..n).rev() {
            let base = bulk_base(BulkRow {
                index: i,
                env: self.env.clone(),
                slots: Arc::clone(&slots),
                specs: Arc::clone(&specs),
                next: next.take(),
                upsert: upsert.clone(),
                written: Arc::clone(&written),
            });
            next = Some(self.env.hooks.compose(&type_name, base));
        }

        let first = lock(&slots)[0].take();
        let outcome = match (next, first) {
            (Some(chain), Some(mut m)) => {
                let outcome = chain(cx, &mut m);
                lock(&slots)[0] = Some(m);
                outcome
            }
            _ => Outcome::Err(missing_row(0)),
        };

        // Hand every mutation back, written or not.
        let mut restored = lock(&slots);
        for (builder, slot) in self.builders.iter_mut().zip(restored.iter_mut()) {
            if let Some(m) = slot.take() {
                builder.draft.mutation = m;
            }
        }
        drop(restored);
        try_outcome!(outcome);
        if !written.load(Ordering::SeqCst) {
            return Outcome::Err(skipped_write());
        }

        let graph = self.env.graph();
        let ty = try_result!(graph.entity(&type_name));
        Outcome::Ok(
            self.builders
                .iter()
                .map(|b| entity_from_mutation(graph, ty, &b.draft.mutation))
                .collect(),
        )
    }
}

/// A hook returned without calling the next mutator, so the batch was never
/// written.
fn skipped_write() -> Error {
    Error::config(
        ConfigErrorKind::Pipeline,
        "bulk create finished without writing the batch",
    )
}

fn missing_row(index: usize) -> Error {
    Error::config(
        ConfigErrorKind::Pipeline,
        format!("row {index} of bulk create is not available"),
    )
}

struct BulkRow {
    index: usize,
    env: MutationEnv,
    slots: Slots<Mutation>,
    specs: Slots<CreateSpec>,
    next: Option<Mutator>,
    upsert: Option<Upsert>,
    written: Arc<AtomicBool>,
}

fn bulk_base(row: BulkRow) -> Mutator {
    Arc::new(move |cx: &Cx, m: &mut Mutation| {
        let BulkRow {
            index,
            env,
            slots,
            specs,
            next,
            upsert,
            written,
        } = &row;
        let graph = env.graph();
        let ty = try_result!(graph.entity(m.type_name()));
        try_result!(check_create(graph, ty, m, env.dialect()));
        let spec = try_result!(create_spec(graph, ty, m));
        lock(specs)[*index] = Some(spec);

        if let Some(next) = next {
            let Some(mut next_m) = lock(slots).get_mut(index + 1).and_then(Option::take) else {
                return Outcome::Err(missing_row(index + 1));
            };
            let outcome = next(cx, &mut next_m);
            lock(slots)[index + 1] = Some(next_m);
            try_outcome!(outcome);
            if !written.load(Ordering::SeqCst) {
                return Outcome::Err(skipped_write());
            }
        } else {
            let nodes: Option<Vec<CreateSpec>> =
                lock(specs).iter_mut().map(Option::take).collect();
            let Some(nodes) = nodes else {
                return Outcome::Err(Error::config(
                    ConfigErrorKind::Pipeline,
                    "bulk create reached the write with rows missing",
                ));
            };
            let mut batch = BatchCreateSpec {
                nodes,
                on_conflict: None,
            };
            if let Some(upsert) = upsert {
                let mut columns: Vec<String> = Vec::new();
                for column in batch.nodes.iter().flat_map(insert_columns) {
                    if !columns.contains(&column) {
                        columns.push(column);
                    }
                }
                batch.on_conflict = Some(try_result!(upsert.resolve(ty, &columns)));
            }
            let outcome = wrap_constraint(env.driver().batch_create(cx, &mut batch));
            *lock(specs) = batch.nodes.into_iter().map(Some).collect();
            try_outcome!(outcome);
            written.store(true, Ordering::SeqCst);
        }

        let id = lock(specs)
            .get(*index)
            .and_then(Option::as_ref)
            .and_then(|spec| read_id(ty, spec));
        m.finish(id);
        Outcome::Ok(MutationValue::Node(entity_from_mutation(graph, ty, m)))
    })
}

/// Conflict handling for a bulk create.
#[must_use]
pub struct UpsertBulk<'a> {
    bulk: &'a mut CreateBulkBuilder,
    upsert: Upsert,
}

impl UpsertBulk<'_> {
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

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.upsert = self.upsert.resolve_with(set_value(column, value));
        self
    }

    pub fn add(mut self, column: impl Into<String>, delta: impl Into<Value>) -> Self {
        self.upsert = self.upsert.resolve_with(add_value(column, delta));
        self
    }

    pub fn exec(self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.bulk.save_with(cx, Some(self.upsert)));
        Outcome::Ok(())
    }

    /// Ids of the written rows, in input order. Rows skipped by
    /// `do_nothing` have no id and are left out.
    pub fn ids(self, cx: &Cx) -> Outcome<Vec<Value>, Error> {
        let nodes = try_outcome!(self.bulk.save_with(cx, Some(self.upsert)));
        Outcome::Ok(nodes.into_iter().filter_map(|n| n.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use entgraph_core::{DeleteSpec, Dialect, Driver, QueryErrorKind, QuerySpec, Row, UpdateSpec};
    use entgraph_query::QueryEnv;
    use entgraph_schema::{EntityType, Field, SchemaBuilder};

    use crate::hook::{HookRegistry, hook};

    /// Assigns sequential ids on batch insert and counts round trips.
    #[derive(Debug, Default)]
    struct Batcher {
        batches: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl Driver for Batcher {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }
        fn create_node(&self, _cx: &Cx, _spec: &mut CreateSpec) -> Outcome<(), Error> {
            Outcome::Err(Error::Custom("single insert in a bulk test".into()))
        }
        fn batch_create(&self, _cx: &Cx, spec: &mut BatchCreateSpec) -> Outcome<(), Error> {
            self.batches.lock().unwrap().push(spec.nodes.len());
            if self.fail {
                return Outcome::Err(Error::query(
                    QueryErrorKind::Execution,
                    "UNIQUE constraint failed: users.name",
                ));
            }
            for (i, node) in spec.nodes.iter_mut().enumerate() {
                if let Some(id) = node.id.as_mut() {
                    id.value = Some(Value::Int(i as i64 + 1));
                }
            }
            Outcome::Ok(())
        }
        fn query_nodes(&self, _cx: &Cx, _spec: &QuerySpec) -> Outcome<Vec<Row>, Error> {
            Outcome::Ok(Vec::new())
        }
        fn count_nodes(&self, _cx: &Cx, _spec: &QuerySpec) -> Outcome<u64, Error> {
            Outcome::Ok(0)
        }
        fn update_node(&self, _cx: &Cx, _spec: &UpdateSpec) -> Outcome<Option<Row>, Error> {
            Outcome::Ok(None)
        }
        fn update_nodes(&self, _cx: &Cx, _spec: &UpdateSpec) -> Outcome<u64, Error> {
            Outcome::Ok(0)
        }
        fn delete_nodes(&self, _cx: &Cx, _spec: &DeleteSpec) -> Outcome<u64, Error> {
            Outcome::Ok(0)
        }
    }

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn env(hooks: HookRegistry, driver: Arc<Batcher>) -> MutationEnv {
        let graph = SchemaBuilder::new()
            .entity(
                EntityType::new("User")
                    .field(Field::string("name").unique())
                    .field(Field::string("role").default("member")),
            )
            .entity(EntityType::new("Group").field(Field::string("name")))
            .build()
            .unwrap();
        MutationEnv::new(QueryEnv::new(Arc::new(graph), driver), Arc::new(hooks))
    }

    fn users(env: &MutationEnv, names: &[&str]) -> Vec<CreateBuilder> {
        names
            .iter()
            .map(|name| {
                let mut b = CreateBuilder::new(env.clone(), "User");
                b.set("name", *name);
                b
            })
            .collect()
    }

    #[test]
    fn test_one_round_trip_and_ids_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        let hooks = HookRegistry::new().hook(
            "User",
            hook(move |cx, m, next| {
                seen.lock().unwrap().push(format!("{:?}", m.field("name")));
                next(cx, m)
            }),
        );
        let driver = Arc::new(Batcher::default());
        let env = env(hooks, Arc::clone(&driver));
        let mut bulk = CreateBulkBuilder::new(env.clone(), users(&env, &["a", "b", "c"]));
        let cx = Cx::for_testing();
        let nodes = unwrap_outcome(bulk.save(&cx));
        let ids: Vec<_> = nodes.iter().map(|n| n.id.clone()).collect();
        assert_eq!(
            ids,
            vec![Some(Value::Int(1)), Some(Value::Int(2)), Some(Value::Int(3))]
        );
        assert_eq!(nodes[1].get("name"), Some(&Value::from("b")));
        assert_eq!(*driver.batches.lock().unwrap(), vec![3]);
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_failure_assigns_no_ids() {
        let driver = Arc::new(Batcher {
            fail: true,
            ..Batcher::default()
        });
        let env = env(HookRegistry::new(), Arc::clone(&driver));
        let mut bulk = CreateBulkBuilder::new(env.clone(), users(&env, &["a", "a"]));
        let cx = Cx::for_testing();
        let out = bulk.save(&cx);
        assert!(matches!(out, Outcome::Err(Error::Constraint(_))));
        assert!(bulk.builders.iter().all(|b| b.mutation().id().is_none()));
        assert!(bulk.builders.iter().all(|b| !b.mutation().is_done()));
    }

    #[test]
    fn test_invalid_row_fails_before_any_hook() {
        let driver = Arc::new(Batcher::default());
        let env = env(HookRegistry::new(), Arc::clone(&driver));
        let mut builders = users(&env, &["a"]);
        builders.push(CreateBuilder::new(env.clone(), "User"));
        let mut bulk = CreateBulkBuilder::new(env, builders);
        let cx = Cx::for_testing();
        assert!(matches!(bulk.save(&cx), Outcome::Err(Error::Validation(_))));
        assert!(driver.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_row_leaves_earlier_rows_without_defaults() {
        let driver = Arc::new(Batcher::default());
        let env = env(HookRegistry::new(), Arc::clone(&driver));
        let mut builders = users(&env, &["a", "b"]);
        builders.push(CreateBuilder::new(env.clone(), "User"));
        let mut bulk = CreateBulkBuilder::new(env, builders);
        let cx = Cx::for_testing();
        assert!(matches!(bulk.save(&cx), Outcome::Err(Error::Validation(_))));
        assert!(bulk.builders().iter().all(|b| b.mutation().field("role").is_none()));

        bulk.builders_mut()[2].set("name", "c");
        let nodes = unwrap_outcome(bulk.save(&cx));
        assert_eq!(nodes.len(), 3);
        assert!(bulk
            .builders()
            .iter()
            .all(|b| b.mutation().field("role") == Some(&Value::from("member"))));
    }

    #[test]
    fn test_hook_skipping_next_fails_the_batch() {
        let hooks = HookRegistry::new().hook(
            "User",
            hook(|cx, m, next| {
                if m.field("name") == Some(&Value::from("b")) {
                    return Outcome::Ok(MutationValue::Affected(0));
                }
                next(cx, m)
            }),
        );
        let driver = Arc::new(Batcher::default());
        let env = env(hooks, Arc::clone(&driver));
        let mut bulk = CreateBulkBuilder::new(env.clone(), users(&env, &["a", "b", "c"]));
        let cx = Cx::for_testing();
        let out = bulk.save(&cx);
        assert!(matches!(out, Outcome::Err(Error::Config(_))));
        assert!(driver.batches.lock().unwrap().is_empty());
        assert!(bulk.builders().iter().all(|b| !b.mutation().is_done()));
        assert!(bulk.builders().iter().all(|b| b.mutation().id().is_none()));
    }

    #[test]
    fn test_mixed_types_rejected() {
        let driver = Arc::new(Batcher::default());
        let env = env(HookRegistry::new(), driver);
        let mut builders = users(&env, &["a"]);
        let mut group = CreateBuilder::new(env.clone(), "Group");
        group.set("name", "g");
        builders.push(group);
        let cx = Cx::for_testing();
        let out = CreateBulkBuilder::new(env, builders).save(&cx);
        assert!(matches!(out, Outcome::Err(Error::Custom(_))));
    }

    #[test]
    fn test_empty_bulk_is_a_no_op() {
        let driver = Arc::new(Batcher::default());
        let env = env(HookRegistry::new(), Arc::clone(&driver));
        let cx = Cx::for_testing();
        let nodes = unwrap_outcome(CreateBulkBuilder::new(env, Vec::new()).save(&cx));
        assert!(nodes.is_empty());
        assert!(driver.batches.lock().unwrap().is_empty());
    }
}
