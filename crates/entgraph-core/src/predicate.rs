//! Portable predicate selector.
//!
//! Builders compose `Predicate` trees; drivers either evaluate them directly
//! or render them with [`Predicate::to_sql`]. Graph predicates
//! (`HasNeighbors`, `HasNeighborsWith`) carry a resolved [`NeighborStep`] so
//! no schema lookup is needed at execution time.

use crate::dialect::Dialect;
use crate::relationship::{FkOwner, Relation};
use crate::value::Value;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    const fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// String matching operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Contains,
    HasPrefix,
    HasSuffix,
    EqualFold,
}

/// One table endpoint of a graph step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNode {
    pub table: String,
    pub id_column: String,
}

/// A traversal from rows of `from` to their neighbors in `to` over one edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborStep {
    pub from: StepNode,
    pub to: StepNode,
    /// The edge's relation as seen from `from`.
    pub relation: Relation,
}

impl NeighborStep {
    /// The same step walked in the opposite direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            relation: self.relation.reversed(None),
        }
    }
}

/// A boolean filter over one table's rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    Text {
        column: String,
        op: TextOp,
        pattern: String,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Row has at least one neighbor over the step.
    HasNeighbors(Box<NeighborStep>),
    /// Row has at least one neighbor over the step matching the predicate.
    HasNeighborsWith(Box<NeighborStep>, Box<Predicate>),
}

fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Predicate {
    Predicate::Compare {
        column: column.into(),
        op,
        value: value.into(),
    }
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, CompareOp::Ne, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, CompareOp::Gt, value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, CompareOp::Gte, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, CompareOp::Lt, value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        compare(column, CompareOp::Lte, value)
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull {
            column: column.into(),
            negated: false,
        }
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Predicate::IsNull {
            column: column.into(),
            negated: true,
        }
    }

    pub fn contains(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Text {
            column: column.into(),
            op: TextOp::Contains,
            pattern: pattern.into(),
        }
    }

    pub fn has_prefix(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Text {
            column: column.into(),
            op: TextOp::HasPrefix,
            pattern: pattern.into(),
        }
    }

    pub fn has_suffix(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Text {
            column: column.into(),
            op: TextOp::HasSuffix,
            pattern: pattern.into(),
        }
    }

    pub fn equal_fold(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Text {
            column: column.into(),
            op: TextOp::EqualFold,
            pattern: pattern.into(),
        }
    }

    /// Conjunction; a single operand is returned unwrapped.
    pub fn and(mut preds: Vec<Predicate>) -> Self {
        if preds.len() == 1 {
            if let Some(only) = preds.pop() {
                return only;
            }
        }
        Predicate::And(preds)
    }

    /// Disjunction; a single operand is returned unwrapped.
    pub fn or(mut preds: Vec<Predicate>) -> Self {
        if preds.len() == 1 {
            if let Some(only) = preds.pop() {
                return only;
            }
        }
        Predicate::Or(preds)
    }

    pub fn not(pred: Predicate) -> Self {
        Predicate::Not(Box::new(pred))
    }

    pub fn has_neighbors(step: NeighborStep) -> Self {
        Predicate::HasNeighbors(Box::new(step))
    }

    pub fn has_neighbors_with(step: NeighborStep, pred: Predicate) -> Self {
        Predicate::HasNeighborsWith(Box::new(step), Box::new(pred))
    }

    /// Render as a SQL boolean expression over `table`, appending bind
    /// parameters to `params`.
    pub fn to_sql(&self, table: &str, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let col = |c: &str| format!("{}.{}", dialect.quote(table), dialect.quote(c));
        match self {
            Predicate::Compare { column, op, value } => {
                params.push(value.clone());
                format!(
                    "{} {} {}",
                    col(column),
                    op.as_sql(),
                    dialect.placeholder(params.len())
                )
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                let holders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        params.push(v.clone());
                        dialect.placeholder(params.len())
                    })
                    .collect();
                format!(
                    "{} {}IN ({})",
                    col(column),
                    if *negated { "NOT " } else { "" },
                    holders.join(", ")
                )
            }
            Predicate::IsNull { column, negated } => format!(
                "{} IS {}NULL",
                col(column),
                if *negated { "NOT " } else { "" }
            ),
            Predicate::Text {
                column,
                op,
                pattern,
            } => {
                let (lhs, value) = match op {
                    TextOp::Contains => (col(column), format!("%{pattern}%")),
                    TextOp::HasPrefix => (col(column), format!("{pattern}%")),
                    TextOp::HasSuffix => (col(column), format!("%{pattern}")),
                    TextOp::EqualFold => {
                        (format!("LOWER({})", col(column)), pattern.to_lowercase())
                    }
                };
                params.push(Value::Text(value));
                let verb = if *op == TextOp::EqualFold { "=" } else { "LIKE" };
                format!("{lhs} {verb} {}", dialect.placeholder(params.len()))
            }
            Predicate::And(preds) => join_sql(preds, " AND ", "1 = 1", table, dialect, params),
            Predicate::Or(preds) => join_sql(preds, " OR ", "1 = 0", table, dialect, params),
            Predicate::Not(pred) => format!("NOT ({})", pred.to_sql(table, dialect, params)),
            Predicate::HasNeighbors(step) => neighbors_sql(step, None, dialect, params),
            Predicate::HasNeighborsWith(step, pred) => {
                neighbors_sql(step, Some(pred), dialect, params)
            }
        }
    }
}

fn join_sql(
    preds: &[Predicate],
    sep: &str,
    empty: &str,
    table: &str,
    dialect: Dialect,
    params: &mut Vec<Value>,
) -> String {
    if preds.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = preds
        .iter()
        .map(|p| format!("({})", p.to_sql(table, dialect, params)))
        .collect();
    parts.join(sep)
}

fn neighbors_sql(
    step: &NeighborStep,
    pred: Option<&Predicate>,
    dialect: Dialect,
    params: &mut Vec<Value>,
) -> String {
    let q = |t: &str, c: &str| format!("{}.{}", dialect.quote(t), dialect.quote(c));
    let from_id = q(&step.from.table, &step.from.id_column);
    let to_ids = |pred: &Predicate, params: &mut Vec<Value>| {
        format!(
            "SELECT {} FROM {} WHERE {}",
            q(&step.to.table, &step.to.id_column),
            dialect.quote(&step.to.table),
            pred.to_sql(&step.to.table, dialect, params)
        )
    };
    let rel = &step.relation;
    match rel.owner {
        FkOwner::Local => {
            let fk = q(&step.from.table, rel.columns.first().map_or("", String::as_str));
            match pred {
                None => format!("{fk} IS NOT NULL"),
                Some(p) => format!("{fk} IN ({})", to_ids(p, params)),
            }
        }
        FkOwner::Remote => {
            let fk_col = rel.columns.first().map_or("", String::as_str);
            let fk = q(&step.to.table, fk_col);
            let mut sql = format!(
                "{from_id} IN (SELECT {fk} FROM {} WHERE {fk} IS NOT NULL",
                dialect.quote(&step.to.table)
            );
            if let Some(p) = pred {
                sql.push_str(" AND ");
                sql.push_str(&p.to_sql(&step.to.table, dialect, params));
            }
            sql.push(')');
            sql
        }
        FkOwner::JoinTable => {
            let (this, other) = rel.join_columns().unwrap_or(("", ""));
            let mut sql = format!(
                "{from_id} IN (SELECT {} FROM {}",
                q(&rel.table, this),
                dialect.quote(&rel.table)
            );
            if let Some(p) = pred {
                sql.push_str(&format!(" WHERE {} IN ({})", q(&rel.table, other), to_ids(p, params)));
            }
            sql.push(')');
            sql
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::RelationKind;

    fn posts_step() -> NeighborStep {
        NeighborStep {
            from: StepNode {
                table: "users".into(),
                id_column: "id".into(),
            },
            to: StepNode {
                table: "posts".into(),
                id_column: "id".into(),
            },
            relation: Relation {
                kind: RelationKind::OneToMany,
                owner: FkOwner::Remote,
                table: "posts".into(),
                columns: vec!["user_id".into()],
                field: None,
                inverse: None,
                bidi: false,
            },
        }
    }

    #[test]
    fn test_compare_and_in_rendering() {
        let mut params = Vec::new();
        let pred = Predicate::and(vec![
            Predicate::eq("name", "a"),
            Predicate::is_in("id", [1_i64, 2]),
        ]);
        let sql = pred.to_sql("users", Dialect::Postgres, &mut params);
        assert_eq!(
            sql,
            "(\"users\".\"name\" = $1) AND (\"users\".\"id\" IN ($2, $3))"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_empty_in_is_false() {
        let mut params = Vec::new();
        let none: Vec<i64> = Vec::new();
        let sql = Predicate::is_in("id", none).to_sql("users", Dialect::Sqlite, &mut params);
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn test_has_neighbors_remote() {
        let mut params = Vec::new();
        let sql = Predicate::has_neighbors_with(posts_step(), Predicate::eq("title", "x"))
            .to_sql("users", Dialect::Sqlite, &mut params);
        assert_eq!(
            sql,
            "\"users\".\"id\" IN (SELECT \"posts\".\"user_id\" FROM \"posts\" WHERE \"posts\".\"user_id\" IS NOT NULL AND \"posts\".\"title\" = ?1)"
        );
    }

    #[test]
    fn test_single_operand_and_unwraps() {
        let pred = Predicate::and(vec![Predicate::is_null("bio")]);
        assert_eq!(pred, Predicate::is_null("bio"));
    }

    #[test]
    fn test_step_reversed() {
        let back = posts_step().reversed();
        assert_eq!(back.from.table, "posts");
        assert_eq!(back.relation.owner, FkOwner::Local);
    }
}
