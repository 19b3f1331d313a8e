//! Predicate evaluation and row selection.

use std::cmp::Ordering;
use std::collections::HashSet;

use entgraph_core::{
    CompareOp, Error, FkOwner, NeighborStep, Predicate, QueryErrorKind, QuerySpec, Result, Row,
    TextOp, Value,
};

use crate::store::{Record, Store, column};

fn same(a: &Value, b: &Value) -> bool {
    !a.is_null() && !b.is_null() && a.sort_cmp(b) == Ordering::Equal
}

/// Whether `row` of `table` satisfies `pred`. Comparisons against NULL are
/// false, as in SQL.
pub(crate) fn matches(store: &Store, table: &str, row: &Record, pred: &Predicate) -> bool {
    match pred {
        Predicate::Compare {
            column: c,
            op,
            value,
        } => {
            let current = column(row, c);
            if current.is_null() || value.is_null() {
                return false;
            }
            let ord = current.sort_cmp(value);
            match op {
                CompareOp::Eq => ord == Ordering::Equal,
                CompareOp::Ne => ord != Ordering::Equal,
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::Gte => ord != Ordering::Less,
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::Lte => ord != Ordering::Greater,
            }
        }
        Predicate::In {
            column: c,
            values,
            negated,
        } => {
            let current = column(row, c);
            if current.is_null() {
                return false;
            }
            values.iter().any(|v| same(current, v)) != *negated
        }
        Predicate::IsNull { column: c, negated } => column(row, c).is_null() != *negated,
        Predicate::Text {
            column: c,
            op,
            pattern,
        } => column(row, c).as_str().is_some_and(|s| match op {
            TextOp::Contains => s.contains(pattern.as_str()),
            TextOp::HasPrefix => s.starts_with(pattern.as_str()),
            TextOp::HasSuffix => s.ends_with(pattern.as_str()),
            TextOp::EqualFold => s.to_lowercase() == pattern.to_lowercase(),
        }),
        Predicate::And(preds) => preds.iter().all(|p| matches(store, table, row, p)),
        Predicate::Or(preds) => preds.iter().any(|p| matches(store, table, row, p)),
        Predicate::Not(p) => !matches(store, table, row, p),
        Predicate::HasNeighbors(step) => has_neighbors(store, step, row, None),
        Predicate::HasNeighborsWith(step, p) => has_neighbors(store, step, row, Some(p)),
    }
}

fn has_neighbors(store: &Store, step: &NeighborStep, row: &Record, pred: Option<&Predicate>) -> bool {
    let Ok(to) = store.table(&step.to.table) else {
        return false;
    };
    let target_ok = |target: &Record| pred.is_none_or(|p| matches(store, &to.name, target, p));
    let rel = &step.relation;
    match rel.owner {
        FkOwner::Local => {
            let Some(fk) = rel.fk_column().map(|c| column(row, c)) else {
                return false;
            };
            !fk.is_null()
                && to
                    .rows
                    .iter()
                    .any(|t| same(column(t, &step.to.id_column), fk) && target_ok(t))
        }
        FkOwner::Remote => {
            let (Some(fk_column), own) = (rel.fk_column(), column(row, &step.from.id_column)) else {
                return false;
            };
            to.rows
                .iter()
                .any(|t| same(column(t, fk_column), own) && target_ok(t))
        }
        FkOwner::JoinTable => {
            let (Some((this, other)), Ok(join)) = (rel.join_columns(), store.table(&rel.table))
            else {
                return false;
            };
            let own = column(row, &step.from.id_column);
            join.rows.iter().filter(|j| same(column(j, this), own)).any(|j| {
                let neighbor = column(j, other);
                to.rows
                    .iter()
                    .any(|t| same(column(t, &step.to.id_column), neighbor) && target_ok(t))
            })
        }
    }
}

/// Indices of the rows of `table` matching `pred`, in storage order.
pub(crate) fn matching(store: &Store, table: &str, pred: Option<&Predicate>) -> Result<Vec<usize>> {
    let t = store.table(table)?;
    Ok(t.rows
        .iter()
        .enumerate()
        .filter(|(_, row)| pred.is_none_or(|p| matches(store, table, row, p)))
        .map(|(i, _)| i)
        .collect())
}

/// Project `record` onto `columns`; absent columns read as NULL.
pub(crate) fn project(record: &Record, columns: &[String]) -> Row {
    Row::new(
        columns.to_vec(),
        columns.iter().map(|c| column(record, c).clone()).collect(),
    )
}

/// Filter, order, project, deduplicate and page.
pub(crate) fn select(store: &Store, spec: &QuerySpec) -> Result<Vec<Row>> {
    let table = store.table(&spec.table)?;
    let columns = if spec.columns.is_empty() {
        table.columns.clone()
    } else {
        spec.columns.clone()
    };
    if let Some(unknown) = columns.iter().find(|c| !table.has_column(c)) {
        return Err(Error::query(
            QueryErrorKind::Execution,
            format!("no such column: {}.{unknown}", spec.table),
        ));
    }
    let mut rows: Vec<&Record> = matching(store, &spec.table, spec.predicate.as_ref())?
        .into_iter()
        .filter_map(|i| table.rows.get(i))
        .collect();
    if !spec.order.is_empty() {
        rows.sort_by(|a, b| {
            spec.order
                .iter()
                .map(|o| {
                    let ord = column(a, &o.column).sort_cmp(column(b, &o.column));
                    if o.descending { ord.reverse() } else { ord }
                })
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
    let mut out: Vec<Row> = rows.into_iter().map(|r| project(r, &columns)).collect();
    if spec.distinct {
        let mut seen: HashSet<Vec<Value>> = HashSet::new();
        out.retain(|row| seen.insert(row.iter().map(|(_, v)| v.clone()).collect()));
    }
    let offset = spec.offset.unwrap_or(0);
    let limit = spec.limit.unwrap_or(usize::MAX);
    Ok(out.into_iter().skip(offset).take(limit).collect())
}
