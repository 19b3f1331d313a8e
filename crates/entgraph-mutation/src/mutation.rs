//! Mutation state shared by builders, hooks and policies.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use entgraph_core::{Error, Predicate, Result, Value};

/// The kind of write a mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    UpdateOne,
    Update,
    DeleteOne,
    Delete,
}

impl Op {
    pub const fn as_str(self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::UpdateOne => "update_one",
            Op::Update => "update",
            Op::DeleteOne => "delete_one",
            Op::Delete => "delete",
        }
    }

    pub fn is_any(self, ops: &[Op]) -> bool {
        ops.contains(&self)
    }

    pub const fn is_update(self) -> bool {
        matches!(self, Op::Update | Op::UpdateOne)
    }

    pub const fn is_delete(self) -> bool {
        matches!(self, Op::Delete | Op::DeleteOne)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated changes of one builder.
///
/// Scalar fields are last-write-wins; edge id sets accumulate. Once the
/// write has executed the mutation is `done` and rejects further changes.
#[derive(Debug, Clone)]
pub struct Mutation {
    type_name: String,
    op: Op,
    id: Option<Value>,
    fields: BTreeMap<String, Value>,
    added: BTreeMap<String, Value>,
    cleared: BTreeSet<String>,
    added_edges: BTreeMap<String, Vec<Value>>,
    removed_edges: BTreeMap<String, Vec<Value>>,
    cleared_edges: BTreeSet<String>,
    predicates: Vec<Predicate>,
    done: bool,
}

impl Mutation {
    pub fn new(type_name: impl Into<String>, op: Op) -> Self {
        Self {
            type_name: type_name.into(),
            op,
            id: None,
            fields: BTreeMap::new(),
            added: BTreeMap::new(),
            cleared: BTreeSet::new(),
            added_edges: BTreeMap::new(),
            removed_edges: BTreeMap::new(),
            cleared_edges: BTreeSet::new(),
            predicates: Vec::new(),
            done: false,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn ensure_open(&self) -> Result<()> {
        if self.done {
            return Err(Error::Custom("mutation already executed".to_string()));
        }
        Ok(())
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: Value) -> Result<()> {
        self.ensure_open()?;
        self.id = Some(id);
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Fields set so far, by name.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        self.ensure_open()?;
        let name = name.into();
        self.cleared.remove(&name);
        self.fields.insert(name, value);
        Ok(())
    }

    /// Forget a set value, as if the setter was never called.
    pub fn reset_field(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.fields.remove(name);
        self.added.remove(name);
        self.cleared.remove(name);
        Ok(())
    }

    /// Numeric increment applied on update.
    pub fn add_field(&mut self, name: impl Into<String>, delta: Value) -> Result<()> {
        self.ensure_open()?;
        let name = name.into();
        let total = match (self.added.get(&name), &delta) {
            (Some(Value::Int(a)), Value::Int(b)) => Value::Int(a.saturating_add(*b)),
            (Some(Value::Float(a)), Value::Float(b)) => Value::Float(a + b),
            _ => delta,
        };
        self.added.insert(name, total);
        Ok(())
    }

    pub fn added_field(&self, name: &str) -> Option<&Value> {
        self.added.get(name)
    }

    pub fn added_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.added.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Set the column to NULL on update.
    pub fn clear_field(&mut self, name: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        let name = name.into();
        self.fields.remove(&name);
        self.added.remove(&name);
        self.cleared.insert(name);
        Ok(())
    }

    pub fn field_cleared(&self, name: &str) -> bool {
        self.cleared.contains(name)
    }

    pub fn cleared_fields(&self) -> impl Iterator<Item = &str> {
        self.cleared.iter().map(String::as_str)
    }

    /// Replace the ids of a unique edge.
    pub fn set_edge_id(&mut self, edge: impl Into<String>, id: Value) -> Result<()> {
        self.ensure_open()?;
        self.added_edges.insert(edge.into(), vec![id]);
        Ok(())
    }

    /// Accumulate ids of a multi-valued edge; duplicates are dropped.
    pub fn add_edge_ids<I>(&mut self, edge: impl Into<String>, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = Value>,
    {
        self.ensure_open()?;
        let entry = self.added_edges.entry(edge.into()).or_default();
        for id in ids {
            if !entry.contains(&id) {
                entry.push(id);
            }
        }
        Ok(())
    }

    pub fn remove_edge_ids<I>(&mut self, edge: impl Into<String>, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = Value>,
    {
        self.ensure_open()?;
        let entry = self.removed_edges.entry(edge.into()).or_default();
        for id in ids {
            if !entry.contains(&id) {
                entry.push(id);
            }
        }
        Ok(())
    }

    pub fn clear_edge(&mut self, edge: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        let edge = edge.into();
        self.added_edges.remove(&edge);
        self.cleared_edges.insert(edge);
        Ok(())
    }

    pub fn edge_ids(&self, edge: &str) -> &[Value] {
        self.added_edges.get(edge).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn removed_edge_ids(&self, edge: &str) -> &[Value] {
        self.removed_edges.get(edge).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn edge_cleared(&self, edge: &str) -> bool {
        self.cleared_edges.contains(edge)
    }

    /// Edges with added ids, in name order.
    pub fn added_edges(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.added_edges
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn removed_edges(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.removed_edges
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn cleared_edges(&self) -> impl Iterator<Item = &str> {
        self.cleared_edges.iter().map(String::as_str)
    }

    pub fn where_(&mut self, pred: Predicate) -> Result<()> {
        self.ensure_open()?;
        self.predicates.push(pred);
        Ok(())
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// True when nothing would be written.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.added.is_empty()
            && self.cleared.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
            && self.cleared_edges.is_empty()
    }

    pub(crate) fn finish(&mut self, id: Option<Value>) {
        if id.is_some() {
            self.id = id;
        }
        self.done = true;
    }
}
