//! Tables, rows and constraints of the in-memory store.

use std::collections::{BTreeMap, HashSet};

use entgraph_core::{Error, QueryErrorKind, Result, Value};
use entgraph_schema::Graph;

pub(crate) type Record = BTreeMap<String, Value>;

pub(crate) static NULL: Value = Value::Null;

pub(crate) fn column<'a>(row: &'a Record, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub id_column: Option<String>,
    pub uniques: Vec<Vec<String>>,
    pub rows: Vec<Record>,
    /// Next auto-assigned id; `None` once `i64::MAX` has been used.
    pub next_id: Option<i64>,
}

impl Table {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: Some(1),
            ..Self::default()
        }
    }

    fn add_column(&mut self, column: &str) {
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Index of the row with identifier `id`.
    pub fn position(&self, id: &Value) -> Option<usize> {
        let id_column = self.id_column.as_deref()?;
        self.rows.iter().position(|r| column(r, id_column) == id)
    }

    /// Index of an existing row equal to `record` on every column in
    /// `columns`. NULLs never collide.
    pub fn collision(&self, record: &Record, columns: &[String]) -> Option<usize> {
        if columns.is_empty() {
            return None;
        }
        let key: Vec<&Value> = columns.iter().map(|c| column(record, c)).collect();
        if key.iter().any(|v| v.is_null()) {
            return None;
        }
        self.rows
            .iter()
            .position(|row| columns.iter().zip(&key).all(|(c, v)| column(row, c) == *v))
    }

    /// Index of an existing row colliding with `record` on any unique set.
    pub fn any_collision(&self, record: &Record) -> Option<usize> {
        self.uniques.iter().find_map(|set| self.collision(record, set))
    }

    pub fn check_unique(&self) -> Result<()> {
        for set in &self.uniques {
            let mut seen: HashSet<Vec<&Value>> = HashSet::new();
            for row in &self.rows {
                let key: Vec<&Value> = set.iter().map(|c| column(row, c)).collect();
                if key.iter().any(|v| v.is_null()) {
                    continue;
                }
                if !seen.insert(key) {
                    let cols: Vec<String> =
                        set.iter().map(|c| format!("{}.{c}", self.name)).collect();
                    return Err(Error::query(
                        QueryErrorKind::Constraint,
                        format!("UNIQUE constraint failed: {}", cols.join(", ")),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A column referencing another table's identifier.
#[derive(Debug, Clone)]
pub(crate) struct Reference {
    pub table: String,
    pub column: String,
    pub references: String,
    /// Rows of join tables are removed with their parent instead of nulled.
    pub cascade: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    pub tables: BTreeMap<String, Table>,
    pub references: Vec<Reference>,
}

impl Store {
    /// One table per entity type and per join table.
    pub fn from_graph(graph: &Graph) -> Self {
        let mut store = Store::default();
        for ty in graph.types() {
            let mut table = Table::new(ty.table.clone());
            for c in ty.columns() {
                table.add_column(&c);
            }
            if let Some(id) = &ty.id {
                table.id_column = Some(id.column.clone());
                table.uniques.push(vec![id.column.clone()]);
            }
            for field in ty.fields.iter().filter(|f| f.unique) {
                table.uniques.push(vec![field.column.clone()]);
            }
            if let Some(parts) = &ty.composite_id {
                table.uniques.push(
                    parts
                        .iter()
                        .filter_map(|p| ty.get_field(p))
                        .map(|f| f.column.clone())
                        .collect(),
                );
            }
            for fk in &ty.foreign_keys {
                table.add_column(&fk.column);
                if fk.unique && !table.uniques.iter().any(|u| u == &[fk.column.clone()]) {
                    table.uniques.push(vec![fk.column.clone()]);
                }
                store.references.push(Reference {
                    table: ty.table.clone(),
                    column: fk.column.clone(),
                    references: fk.references_table.clone(),
                    cascade: false,
                });
            }
            store.tables.insert(table.name.clone(), table);
        }
        for join in graph.join_tables() {
            let mut table = Table::new(join.table.clone());
            for (column, references, _, _) in &join.columns {
                table.add_column(column);
                store.references.push(Reference {
                    table: join.table.clone(),
                    column: column.clone(),
                    references: references.clone(),
                    cascade: true,
                });
            }
            table.uniques.push(table.columns.clone());
            store.tables.insert(table.name.clone(), table);
        }
        store
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| no_such_table(name))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables.get_mut(name).ok_or_else(|| no_such_table(name))
    }

    pub fn check_unique(&self) -> Result<()> {
        self.tables.values().try_for_each(Table::check_unique)
    }

    /// Null out or remove everything referencing the deleted `ids` of `table`.
    pub fn release(&mut self, table: &str, ids: &[Value]) {
        let refs: Vec<Reference> = self
            .references
            .iter()
            .filter(|r| r.references == table)
            .cloned()
            .collect();
        for r in refs {
            let Some(t) = self.tables.get_mut(&r.table) else {
                continue;
            };
            if r.cascade {
                t.rows.retain(|row| !ids.contains(column(row, &r.column)));
            } else {
                for row in &mut t.rows {
                    if ids.contains(column(row, &r.column)) {
                        row.insert(r.column.clone(), Value::Null);
                    }
                }
            }
        }
    }
}

fn no_such_table(name: &str) -> Error {
    Error::query(QueryErrorKind::Execution, format!("no such table: {name}"))
}

/// `current + delta` for numeric columns; NULL counts as zero.
pub(crate) fn add_values(current: &Value, delta: &Value) -> Value {
    match (current, delta) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.saturating_add(*b)),
        (Value::Null, d) => d.clone(),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Value::Float(a + b),
            _ => b.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entgraph_schema::{Edge, EntityType, Field, SchemaBuilder};

    fn store() -> Store {
        let graph = SchemaBuilder::new()
            .entity(
                EntityType::new("User")
                    .field(Field::string("name").unique())
                    .edge(Edge::to("posts", "Post"))
                    .edge(Edge::to("groups", "Group")),
            )
            .entity(EntityType::new("Post").edge(Edge::from("author", "User").reference("posts").unique()))
            .entity(EntityType::new("Group").edge(Edge::from("users", "User").reference("groups")))
            .build()
            .unwrap();
        Store::from_graph(&graph)
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(c, v)| ((*c).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_tables_from_graph() {
        let store = store();
        assert!(store.table("posts").unwrap().has_column("user_id"));
        let join = store.table("user_groups").unwrap();
        assert_eq!(join.uniques, vec![join.columns.clone()]);
        assert!(store.table("nope").is_err());
    }

    #[test]
    fn test_unique_violation_message() {
        let mut store = store();
        let users = store.table_mut("users").unwrap();
        users.rows.push(record(&[("id", Value::Int(1)), ("name", Value::from("a"))]));
        users.rows.push(record(&[("id", Value::Int(2)), ("name", Value::from("a"))]));
        let err = users.check_unique().unwrap_err();
        assert!(err.to_string().ends_with("UNIQUE constraint failed: users.name"));
        assert!(entgraph_core::is_constraint_violation(&err));
    }

    #[test]
    fn test_nulls_never_collide() {
        let mut store = store();
        let posts = store.table_mut("posts").unwrap();
        posts.rows.push(record(&[("id", Value::Int(1)), ("user_id", Value::Null)]));
        let probe = record(&[("user_id", Value::Null)]);
        assert_eq!(posts.collision(&probe, &["user_id".to_string()]), None);
    }

    #[test]
    fn test_release_nulls_and_cascades() {
        let mut store = store();
        store
            .table_mut("posts")
            .unwrap()
            .rows
            .push(record(&[("id", Value::Int(1)), ("user_id", Value::Int(9))]));
        store
            .table_mut("user_groups")
            .unwrap()
            .rows
            .push(record(&[("user_id", Value::Int(9)), ("group_id", Value::Int(1))]));
        store.release("users", &[Value::Int(9)]);
        assert_eq!(store.table("posts").unwrap().rows[0]["user_id"], Value::Null);
        assert!(store.table("user_groups").unwrap().rows.is_empty());
    }

    #[test]
    fn test_add_values() {
        assert_eq!(add_values(&Value::Int(2), &Value::Int(3)), Value::Int(5));
        assert_eq!(add_values(&Value::Null, &Value::Int(3)), Value::Int(3));
        assert_eq!(add_values(&Value::Float(0.5), &Value::Int(1)), Value::Float(1.5));
    }
}
