//! The in-memory [`Driver`].
//!
//! Every write runs against a copy of the store which replaces the live store
//! only when the whole operation succeeded, so a failing statement (or a
//! failing row of a batch) leaves no trace.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use entgraph_core::{
    BatchCreateSpec, ConflictAction, ConflictTarget, ConflictUpdate, ConflictValue, CreateSpec,
    Cx, DeleteSpec, Dialect, Driver, EdgeOp, EdgeSpec, Error, FkOwner, Outcome,
    QueryErrorKind, QuerySpec, Result, Row, UpdateSpec, Value,
};
use entgraph_schema::Graph;

use crate::eval::{matching, project, select};
use crate::store::{Record, Store, add_values, column};

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub creates: u64,
    pub batch_creates: u64,
    pub queries: u64,
    pub counts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl DriverStats {
    /// Total driver calls.
    pub fn round_trips(&self) -> u64 {
        self.creates + self.batch_creates + self.queries + self.counts + self.updates + self.deletes
    }

    /// Calls that wrote.
    pub fn writes(&self) -> u64 {
        self.creates + self.batch_creates + self.updates + self.deletes
    }
}

#[derive(Debug, Default)]
struct Counters {
    creates: AtomicU64,
    batch_creates: AtomicU64,
    queries: AtomicU64,
    counts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DriverStats {
        DriverStats {
            creates: self.creates.load(Ordering::Relaxed),
            batch_creates: self.batch_creates.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            counts: self.counts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.creates,
            &self.batch_creates,
            &self.queries,
            &self.counts,
            &self.updates,
            &self.deletes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A [`Driver`] keeping every table of a [`Graph`] in process memory.
///
/// Unique constraints (identifiers, unique fields, unique foreign keys and
/// join-table pairs) are enforced and reported the way SQLite reports them.
/// Deleting a node nulls foreign keys pointing at it and removes its
/// join-table rows.
#[derive(Debug)]
pub struct MemoryDriver {
    dialect: Dialect,
    store: Mutex<Store>,
    counters: Counters,
}

impl MemoryDriver {
    /// A driver for `graph`, speaking the graph's first dialect.
    pub fn new(graph: &Graph) -> Self {
        let dialect = graph.dialects().first().copied().unwrap_or(Dialect::Sqlite);
        Self::with_dialect(graph, dialect)
    }

    pub fn with_dialect(graph: &Graph, dialect: Dialect) -> Self {
        Self {
            dialect,
            store: Mutex::new(Store::from_graph(graph)),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Every stored row of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let store = self.lock();
        let t = store.table(table)?;
        Ok(t.rows.iter().map(|r| project(r, &t.columns)).collect())
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against a copy of the store and commit the copy on success.
    fn write<T>(&self, f: impl FnOnce(&mut Store) -> Result<T>) -> Result<T> {
        let mut live = self.lock();
        let mut draft = live.clone();
        let out = f(&mut draft)?;
        *live = draft;
        Ok(out)
    }
}

macro_rules! check_cancel {
    ($cx:expr) => {
        if let Some(reason) = $cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
    };
}

fn outcome<T>(result: Result<T>) -> Outcome<T, Error> {
    match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    }
}

fn not_null(table: &str, column: &str) -> Error {
    Error::query(
        QueryErrorKind::Constraint,
        format!("NOT NULL constraint failed: {table}.{column}"),
    )
}

/// Insert one node into `store`, resolving conflicts and applying edges.
fn insert(store: &mut Store, spec: &mut CreateSpec, on_conflict: Option<&ConflictAction>) -> Result<()> {
    let mut record = Record::new();
    for field in &spec.fields {
        record.insert(field.column.clone(), field.value.clone());
    }
    if let Some(id) = &spec.id {
        if let Some(value) = &id.value {
            record.insert(id.column.clone(), value.clone());
        }
    }

    let table = store.table_mut(&spec.table)?;
    if let Some(action) = on_conflict.or(spec.on_conflict.as_ref()) {
        let existing = match &action.target {
            ConflictTarget::Columns(columns) if !columns.is_empty() => {
                table.collision(&record, columns)
            }
            _ => table.any_collision(&record),
        };
        if let Some(index) = existing {
            let id_column = table.id_column.clone();
            match &action.update {
                ConflictUpdate::DoNothing => {
                    if let Some(id) = spec.id.as_mut() {
                        id.value = None;
                    }
                    return Ok(());
                }
                ConflictUpdate::Set(updates) => {
                    let Some(row) = table.rows.get_mut(index) else {
                        return Ok(());
                    };
                    for (col, value) in updates {
                        let next = match value {
                            ConflictValue::Excluded => column(&record, col).clone(),
                            ConflictValue::Unchanged => continue,
                            ConflictValue::Value(v) => v.clone(),
                            ConflictValue::Add(delta) => add_values(column(row, col), delta),
                        };
                        row.insert(col.clone(), next);
                    }
                    let id = id_column.map(|c| column(row, &c).clone());
                    if let (Some(spec_id), Some(id)) = (spec.id.as_mut(), id) {
                        spec_id.value = Some(id);
                    }
                    table.check_unique()?;
                    return Ok(());
                }
            }
        }
    }

    if let Some(id) = spec.id.as_mut() {
        match id.value.clone() {
            Some(Value::Int(given)) => {
                table.next_id = given
                    .checked_add(1)
                    .and_then(|after| table.next_id.map(|next| next.max(after)));
            }
            Some(_) => {}
            None if id.auto_increment || id.kind.is_integer() => {
                let Some(assigned) = table.next_id else {
                    return Err(Error::Custom(format!(
                        "identifier space exhausted for table {}",
                        spec.table
                    )));
                };
                let next = Value::Int(assigned);
                table.next_id = assigned.checked_add(1);
                record.insert(id.column.clone(), next.clone());
                id.value = Some(next);
            }
            None => return Err(not_null(&spec.table, &id.column)),
        }
    }
    for c in &table.columns {
        record.entry(c.clone()).or_insert(Value::Null);
    }
    table.rows.push(record);
    table.check_unique()?;

    if let Some(own) = spec.id.as_ref().and_then(|id| id.value.clone()) {
        for edge in &spec.edges {
            apply_edge(store, &spec.table, &own, EdgeOp::Add, edge)?;
        }
    }
    Ok(())
}

fn set_where(rows: &mut [Record], col: &str, matches: impl Fn(&Record) -> bool, value: &Value) {
    for row in rows.iter_mut().filter(|r| matches(r)) {
        row.insert(col.to_string(), value.clone());
    }
}

/// Apply one edge operation for the node `own` of `table`.
fn apply_edge(store: &mut Store, table: &str, own: &Value, op: EdgeOp, edge: &EdgeSpec) -> Result<()> {
    let rel = &edge.relation;
    let id_of = |t: &str| -> Result<String> {
        store
            .table(t)?
            .id_column
            .clone()
            .ok_or_else(|| Error::query(QueryErrorKind::Execution, format!("{t} has no identifier")))
    };
    match rel.owner {
        FkOwner::Local => {
            let Some(fk) = rel.fk_column().map(str::to_string) else {
                return Ok(());
            };
            let own_id = id_of(table)?;
            let target_id = edge.target.id_column.clone();
            let t = store.table_mut(table)?;
            let is_own = |r: &Record| column(r, &own_id) == own;
            match op {
                EdgeOp::Add => {
                    let Some(target) = edge.ids.last() else {
                        return Ok(());
                    };
                    set_where(&mut t.rows, &fk, is_own, target);
                    if rel.bidi {
                        let target_table = store.table_mut(&edge.target.table)?;
                        set_where(&mut target_table.rows, &fk, |r| column(r, &target_id) == target, own);
                    }
                }
                EdgeOp::Remove => {
                    let linked = |r: &Record| is_own(r) && edge.ids.contains(column(r, &fk));
                    set_where(&mut t.rows, &fk, linked, &Value::Null);
                    if rel.bidi {
                        let target_table = store.table_mut(&edge.target.table)?;
                        let back = |r: &Record| {
                            edge.ids.contains(column(r, &target_id)) && column(r, &fk) == own
                        };
                        set_where(&mut target_table.rows, &fk, back, &Value::Null);
                    }
                }
                EdgeOp::Clear => {
                    set_where(&mut t.rows, &fk, is_own, &Value::Null);
                    if rel.bidi {
                        let target_table = store.table_mut(&edge.target.table)?;
                        set_where(&mut target_table.rows, &fk, |r| column(r, &fk) == own, &Value::Null);
                    }
                }
            }
        }
        FkOwner::Remote => {
            let Some(fk) = rel.fk_column().map(str::to_string) else {
                return Ok(());
            };
            let target_id = edge.target.id_column.clone();
            let t = store.table_mut(&rel.table)?;
            match op {
                EdgeOp::Add => {
                    set_where(&mut t.rows, &fk, |r| edge.ids.contains(column(r, &target_id)), own);
                }
                EdgeOp::Remove => {
                    let linked =
                        |r: &Record| edge.ids.contains(column(r, &target_id)) && column(r, &fk) == own;
                    set_where(&mut t.rows, &fk, linked, &Value::Null);
                }
                EdgeOp::Clear => {
                    set_where(&mut t.rows, &fk, |r| column(r, &fk) == own, &Value::Null);
                }
            }
        }
        FkOwner::JoinTable => {
            let Some((this, other)) = rel.join_columns() else {
                return Ok(());
            };
            let join = store.table_mut(&rel.table)?;
            let pair = |a: &Value, b: &Value| -> Record {
                [(this.to_string(), a.clone()), (other.to_string(), b.clone())]
                    .into_iter()
                    .collect()
            };
            match op {
                EdgeOp::Add => {
                    for id in &edge.ids {
                        let mut rows = vec![pair(own, id)];
                        if rel.bidi && id != own {
                            rows.push(pair(id, own));
                        }
                        for row in rows {
                            if join.collision(&row, &join.columns.clone()).is_none() {
                                join.rows.push(row);
                            }
                        }
                    }
                }
                EdgeOp::Remove => join.rows.retain(|r| {
                    let forward = column(r, this) == own && edge.ids.contains(column(r, other));
                    let backward =
                        rel.bidi && column(r, other) == own && edge.ids.contains(column(r, this));
                    !(forward || backward)
                }),
                EdgeOp::Clear => join.rows.retain(|r| {
                    column(r, this) != own && !(rel.bidi && column(r, other) == own)
                }),
            }
        }
    }
    Ok(())
}

/// Apply `spec` to every matching row; returns the identifiers touched.
fn update(store: &mut Store, spec: &UpdateSpec) -> Result<Vec<Value>> {
    let indices = matching(store, &spec.table, spec.predicate.as_ref())?;
    let t = store.table_mut(&spec.table)?;
    let touched = spec.set.iter().chain(&spec.add).map(|f| &f.column);
    for c in touched.chain(&spec.clear) {
        if !t.has_column(c) {
            return Err(Error::query(
                QueryErrorKind::Execution,
                format!("no such column: {}.{c}", spec.table),
            ));
        }
    }
    let id_column = spec.id_column.clone().or_else(|| t.id_column.clone());
    let mut ids = Vec::with_capacity(indices.len());
    for &i in &indices {
        let Some(row) = t.rows.get_mut(i) else {
            continue;
        };
        for c in &spec.clear {
            row.insert(c.clone(), Value::Null);
        }
        for f in &spec.set {
            row.insert(f.column.clone(), f.value.clone());
        }
        for f in &spec.add {
            let next = add_values(column(row, &f.column), &f.value);
            let next = match (&f.kind, next) {
                (kind, Value::Float(v)) if kind.is_integer() => Value::Int(v as i64),
                (_, v) => v,
            };
            row.insert(f.column.clone(), next);
        }
        if let Some(id) = &id_column {
            ids.push(column(row, id).clone());
        }
    }
    for own in &ids {
        for edge in &spec.edges {
            apply_edge(store, &spec.table, own, edge.op, &edge.spec)?;
        }
    }
    store.check_unique()?;
    Ok(ids)
}

impl Driver for MemoryDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn create_node(&self, cx: &Cx, spec: &mut CreateSpec) -> Outcome<(), Error> {
        check_cancel!(cx);
        Counters::bump(&self.counters.creates);
        let mut draft = spec.clone();
        let result = self.write(|store| insert(store, &mut draft, None));
        if result.is_ok() {
            *spec = draft;
        }
        tracing::trace!(table = %spec.table, ok = result.is_ok(), "memory create");
        outcome(result)
    }

    fn batch_create(&self, cx: &Cx, spec: &mut BatchCreateSpec) -> Outcome<(), Error> {
        check_cancel!(cx);
        Counters::bump(&self.counters.batch_creates);
        let mut draft = spec.clone();
        let result = self.write(|store| {
            let action = draft.on_conflict.clone();
            draft
                .nodes
                .iter_mut()
                .try_for_each(|node| insert(store, node, action.as_ref()))
        });
        if result.is_ok() {
            *spec = draft;
        }
        tracing::trace!(rows = spec.nodes.len(), ok = result.is_ok(), "memory batch create");
        outcome(result)
    }

    fn query_nodes(&self, cx: &Cx, spec: &QuerySpec) -> Outcome<Vec<Row>, Error> {
        check_cancel!(cx);
        Counters::bump(&self.counters.queries);
        outcome(select(&self.lock(), spec))
    }

    fn count_nodes(&self, cx: &Cx, spec: &QuerySpec) -> Outcome<u64, Error> {
        check_cancel!(cx);
        Counters::bump(&self.counters.counts);
        outcome(select(&self.lock(), spec).map(|rows| rows.len() as u64))
    }

    fn update_node(&self, cx: &Cx, spec: &UpdateSpec) -> Outcome<Option<Row>, Error> {
        check_cancel!(cx);
        Counters::bump(&self.counters.updates);
        outcome(self.write(|store| {
            let ids = update(store, spec)?;
            let Some(id) = ids.first() else {
                return Ok(None);
            };
            let t = store.table(&spec.table)?;
            let columns = if spec.columns.is_empty() {
                t.columns.clone()
            } else {
                spec.columns.clone()
            };
            Ok(t.position(id)
                .and_then(|i| t.rows.get(i))
                .map(|r| project(r, &columns)))
        }))
    }

    fn update_nodes(&self, cx: &Cx, spec: &UpdateSpec) -> Outcome<u64, Error> {
        check_cancel!(cx);
        Counters::bump(&self.counters.updates);
        outcome(self.write(|store| update(store, spec).map(|ids| ids.len() as u64)))
    }

    fn delete_nodes(&self, cx: &Cx, spec: &DeleteSpec) -> Outcome<u64, Error> {
        check_cancel!(cx);
        Counters::bump(&self.counters.deletes);
        outcome(self.write(|store| {
            let indices = matching(store, &spec.table, spec.predicate.as_ref())?;
            let t = store.table_mut(&spec.table)?;
            let id_column = t.id_column.clone();
            let mut index = 0;
            let mut ids = Vec::new();
            t.rows.retain(|row| {
                let keep = !indices.contains(&index);
                index += 1;
                if !keep {
                    if let Some(c) = &id_column {
                        ids.push(column(row, c).clone());
                    }
                }
                keep
            });
            store.release(&spec.table, &ids);
            Ok(indices.len() as u64)
        }))
    }
}
