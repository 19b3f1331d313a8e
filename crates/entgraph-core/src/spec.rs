//! Operation specs: transient descriptions of one physical operation.
//!
//! A spec is built fresh for every call by a builder, handed to the
//! [`Driver`](crate::driver::Driver), and dropped. Drivers write generated
//! identifiers back into `CreateSpec::id`.

use crate::dialect::Dialect;
use crate::predicate::{Predicate, StepNode};
use crate::relationship::Relation;
use crate::types::FieldKind;
use crate::value::Value;

/// A column assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub column: String,
    pub kind: FieldKind,
    pub value: Value,
}

impl FieldSpec {
    pub fn new(column: impl Into<String>, kind: FieldKind, value: Value) -> Self {
        Self {
            column: column.into(),
            kind,
            value,
        }
    }
}

/// The identifier column of a created row.
#[derive(Debug, Clone, PartialEq)]
pub struct IdSpec {
    pub column: String,
    pub kind: FieldKind,
    /// The backend generates the value when none is supplied.
    pub auto_increment: bool,
    /// Supplied by the caller, or written back by the driver.
    pub value: Option<Value>,
}

/// Edge rows touched by an operation, seen from the operated-on node.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSpec {
    pub relation: Relation,
    pub target: StepNode,
    pub ids: Vec<Value>,
}

/// How an edge is changed by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOp {
    Add,
    Remove,
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMutation {
    pub op: EdgeOp,
    pub spec: EdgeSpec,
}

/// Columns or named constraint an upsert conflicts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictTarget {
    Columns(Vec<String>),
    Constraint(String),
}

/// New value of one column when the conflict update runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictValue {
    /// The value the conflicting insert carried (`EXCLUDED.col`).
    Excluded,
    /// The existing value (`col = col`).
    Unchanged,
    /// A fixed value.
    Value(Value),
    /// Existing value plus a delta.
    Add(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictUpdate {
    DoNothing,
    Set(Vec<(String, ConflictValue)>),
}

/// Resolved conflict clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictAction {
    pub target: ConflictTarget,
    pub update: ConflictUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSpec {
    pub table: String,
    pub id: Option<IdSpec>,
    pub fields: Vec<FieldSpec>,
    pub edges: Vec<EdgeSpec>,
    pub on_conflict: Option<ConflictAction>,
}

impl CreateSpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: None,
            fields: Vec::new(),
            edges: Vec::new(),
            on_conflict: None,
        }
    }

    /// Render a single-row INSERT.
    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut columns = Vec::new();
        let mut params = Vec::new();
        if let Some(IdSpec {
            column,
            value: Some(value),
            ..
        }) = &self.id
        {
            columns.push(dialect.quote(column));
            params.push(value.clone());
        }
        for field in &self.fields {
            columns.push(dialect.quote(&field.column));
            params.push(field.value.clone());
        }
        let holders: Vec<String> = (1..=params.len()).map(|i| dialect.placeholder(i)).collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote(&self.table),
            columns.join(", "),
            holders.join(", ")
        );
        if let Some(action) = &self.on_conflict {
            sql.push_str(&conflict_sql(action, dialect, &mut params));
        }
        (sql, params)
    }
}

/// Several rows of one table inserted in one statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchCreateSpec {
    pub nodes: Vec<CreateSpec>,
    pub on_conflict: Option<ConflictAction>,
}

/// Ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub table: String,
    pub id_column: Option<String>,
    /// Projected columns, in scan order.
    pub columns: Vec<String>,
    pub predicate: Option<Predicate>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub distinct: bool,
}

impl QuerySpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Render a SELECT.
    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| format!("{}.{}", dialect.quote(&self.table), dialect.quote(c)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if self.distinct { "DISTINCT " } else { "" },
            columns,
            dialect.quote(&self.table)
        );
        if let Some(pred) = &self.predicate {
            sql.push_str(" WHERE ");
            sql.push_str(&pred.to_sql(&self.table, dialect, &mut params));
        }
        if !self.order.is_empty() {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|o| {
                    format!(
                        "{}{}",
                        dialect.quote(&o.column),
                        if o.descending { " DESC" } else { "" }
                    )
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        (sql, params)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateSpec {
    pub table: String,
    pub id_column: Option<String>,
    pub predicate: Option<Predicate>,
    pub set: Vec<FieldSpec>,
    /// Numeric increments.
    pub add: Vec<FieldSpec>,
    /// Columns set to NULL.
    pub clear: Vec<String>,
    pub edges: Vec<EdgeMutation>,
    /// Projection returned by single-row updates.
    pub columns: Vec<String>,
}

impl UpdateSpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// True when the update touches no column and no edge.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add.is_empty() && self.clear.is_empty() && self.edges.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteSpec {
    pub table: String,
    pub predicate: Option<Predicate>,
}

impl DeleteSpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicate: None,
        }
    }

    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote(&self.table));
        if let Some(pred) = &self.predicate {
            sql.push_str(" WHERE ");
            sql.push_str(&pred.to_sql(&self.table, dialect, &mut params));
        }
        (sql, params)
    }
}

fn conflict_sql(action: &ConflictAction, dialect: Dialect, params: &mut Vec<Value>) -> String {
    let mut sql = String::new();
    if dialect == Dialect::Mysql {
        return match &action.update {
            ConflictUpdate::DoNothing => String::new(),
            ConflictUpdate::Set(sets) => {
                sql.push_str(" ON DUPLICATE KEY UPDATE ");
                sql.push_str(&assignments(sets, dialect, params, "VALUES(", ")"));
                sql
            }
        };
    }
    match &action.target {
        ConflictTarget::Columns(cols) => {
            let cols: Vec<String> = cols.iter().map(|c| dialect.quote(c)).collect();
            sql.push_str(&format!(" ON CONFLICT ({})", cols.join(", ")));
        }
        ConflictTarget::Constraint(name) => {
            sql.push_str(&format!(" ON CONFLICT ON CONSTRAINT {}", dialect.quote(name)));
        }
    }
    match &action.update {
        ConflictUpdate::DoNothing => sql.push_str(" DO NOTHING"),
        ConflictUpdate::Set(sets) => {
            sql.push_str(" DO UPDATE SET ");
            sql.push_str(&assignments(sets, dialect, params, "EXCLUDED.", ""));
        }
    }
    sql
}

fn assignments(
    sets: &[(String, ConflictValue)],
    dialect: Dialect,
    params: &mut Vec<Value>,
    excluded_prefix: &str,
    excluded_suffix: &str,
) -> String {
    sets.iter()
        .map(|(column, value)| {
            let c = dialect.quote(column);
            let rhs = match value {
                ConflictValue::Excluded => format!("{excluded_prefix}{c}{excluded_suffix}"),
                ConflictValue::Unchanged => c.clone(),
                ConflictValue::Value(v) => {
                    params.push(v.clone());
                    dialect.placeholder(params.len())
                }
                ConflictValue::Add(v) => {
                    params.push(v.clone());
                    format!("{c} + {}", dialect.placeholder(params.len()))
                }
            };
            format!("{c} = {rhs}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql_with_conflict() {
        let mut spec = CreateSpec::new("users");
        spec.fields
            .push(FieldSpec::new("name", FieldKind::String, Value::from("a")));
        spec.fields
            .push(FieldSpec::new("age", FieldKind::Int32, Value::Int(3)));
        spec.on_conflict = Some(ConflictAction {
            target: ConflictTarget::Columns(vec!["name".into()]),
            update: ConflictUpdate::Set(vec![
                ("age".into(), ConflictValue::Excluded),
                ("name".into(), ConflictValue::Unchanged),
            ]),
        });
        let (sql, params) = spec.to_sql(Dialect::Postgres);
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2) ON CONFLICT (\"name\") DO UPDATE SET \"age\" = EXCLUDED.\"age\", \"name\" = \"name\""
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_insert_sql_mysql_do_nothing() {
        let mut spec = CreateSpec::new("users");
        spec.fields
            .push(FieldSpec::new("name", FieldKind::String, Value::from("a")));
        spec.on_conflict = Some(ConflictAction {
            target: ConflictTarget::Constraint("users_name_key".into()),
            update: ConflictUpdate::DoNothing,
        });
        let (sql, _) = spec.to_sql(Dialect::Mysql);
        assert_eq!(sql, "INSERT INTO `users` (`name`) VALUES (?)");
    }

    #[test]
    fn test_select_sql() {
        let mut spec = QuerySpec::new("users");
        spec.columns = vec!["id".into(), "name".into()];
        spec.predicate = Some(Predicate::gt("id", 3_i64));
        spec.order.push(OrderBy::desc("id"));
        spec.limit = Some(2);
        let (sql, params) = spec.to_sql(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT \"users\".\"id\", \"users\".\"name\" FROM \"users\" WHERE \"users\".\"id\" > ?1 ORDER BY \"id\" DESC LIMIT 2"
        );
        assert_eq!(params, vec![Value::Int(3)]);
    }

    #[test]
    fn test_delete_sql_without_predicate() {
        let (sql, params) = DeleteSpec::new("posts").to_sql(Dialect::Postgres);
        assert_eq!(sql, "DELETE FROM \"posts\"");
        assert!(params.is_empty());
    }
}
