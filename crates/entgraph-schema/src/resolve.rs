//! Relation resolution.
//!
//! Decides, for every edge, the relation kind, which table physically holds
//! the join column(s) and what they are called. An inverse edge never owns
//! storage of its own: it resolves the association it references and reads
//! the result in reverse, so both ends always agree on one descriptor.

use entgraph_core::{ConfigErrorKind, Error, FkOwner, Relation, RelationKind, Result};

use crate::edge::Edge;
use crate::graph::EntityType;

/// `UserGroup` -> `user_group`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

fn singular(name: &str) -> &str {
    match name.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem,
        _ => name,
    }
}

pub(crate) fn find_type<'a>(types: &'a [EntityType], name: &str) -> Result<&'a EntityType> {
    types.iter().find(|t| t.name == name).ok_or_else(|| {
        Error::config(
            ConfigErrorKind::Unknown,
            format!("unknown entity type {name:?}"),
        )
    })
}

fn id_column<'a>(ty: &'a EntityType, owner: &EntityType, edge: &Edge) -> Result<&'a str> {
    ty.id.as_ref().map(|f| f.column.as_str()).ok_or_else(|| {
        Error::config(
            ConfigErrorKind::MissingIdentifier,
            format!(
                "edge {}.{} relates to {}, which has no identifier field",
                owner.name, edge.name, ty.name
            ),
        )
    })
}

/// The edge on `target` declared as the inverse of `owner.edge`.
pub fn find_inverse<'a>(target: &'a EntityType, owner: &EntityType, edge: &Edge) -> Option<&'a Edge> {
    target
        .edges
        .iter()
        .find(|e| e.target == owner.name && e.reference.as_deref() == Some(edge.name.as_str()))
}

/// Resolve one edge of `owner`.
pub fn resolve_edge(types: &[EntityType], owner: &EntityType, edge: &Edge) -> Result<Relation> {
    let target = find_type(types, &edge.target)?;
    if let Some(assoc_name) = &edge.reference {
        let assoc = target.get_edge(assoc_name).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::InverseMismatch,
                format!(
                    "edge {}.{} references missing edge {}.{}",
                    owner.name, edge.name, target.name, assoc_name
                ),
            )
        })?;
        if assoc.is_inverse() || assoc.target != owner.name {
            return Err(Error::config(
                ConfigErrorKind::InverseMismatch,
                format!(
                    "edge {}.{} must reference an association edge targeting {}",
                    owner.name, edge.name, owner.name
                ),
            ));
        }
        let forward = resolve_association(types, target, assoc, Some(edge))?;
        let mut rel = forward.reversed(Some(assoc.name.clone()));
        if rel.field.is_none() {
            rel.field.clone_from(&edge.field);
        }
        return Ok(rel);
    }
    let inverse = find_inverse(target, owner, edge);
    resolve_association(types, owner, edge, inverse)
}

fn check_declared(owner: &EntityType, edge: &Edge, kind: RelationKind) -> Result<()> {
    match edge.declared_kind {
        Some(declared) if declared != kind => Err(Error::config(
            ConfigErrorKind::InverseMismatch,
            format!(
                "edge {}.{} is declared {declared} but resolves to {kind}",
                owner.name, edge.name
            ),
        )),
        _ => Ok(()),
    }
}

fn resolve_association(
    types: &[EntityType],
    owner: &EntityType,
    assoc: &Edge,
    inverse: Option<&Edge>,
) -> Result<Relation> {
    let target = find_type(types, &assoc.target)?;
    let self_ref = owner.name == target.name;
    let (kind, bidi) = match inverse {
        Some(inv) => {
            let kind = match (assoc.unique, inv.unique) {
                (true, true) => RelationKind::OneToOne,
                (false, true) => RelationKind::OneToMany,
                (true, false) => RelationKind::ManyToOne,
                (false, false) => RelationKind::ManyToMany,
            };
            (kind, false)
        }
        None => match (assoc.unique, self_ref) {
            (true, true) => (RelationKind::OneToOne, true),
            (true, false) => (RelationKind::ManyToOne, false),
            (false, true) => (RelationKind::ManyToMany, true),
            (false, false) => (RelationKind::OneToMany, false),
        },
    };
    check_declared(owner, assoc, kind)?;

    let target_id = id_column(target, owner, assoc)?;
    let owner_id = id_column(owner, owner, assoc)?;
    let bound_field = assoc
        .field
        .clone()
        .or_else(|| inverse.and_then(|inv| inv.field.clone()));
    let declared = assoc
        .declared_columns()
        .or_else(|| inverse.and_then(Edge::declared_columns))
        .map(<[String]>::to_vec);

    let rel = match kind {
        RelationKind::ManyToMany => {
            let table = match &assoc.through {
                Some(through) => find_type(types, through)?.table.clone(),
                None => assoc
                    .storage
                    .as_ref()
                    .and_then(|s| s.table.clone())
                    .unwrap_or_else(|| format!("{}_{}", owner.label(), assoc.name)),
            };
            let columns = match declared {
                Some(cols) if cols.len() == 2 => cols,
                Some(cols) => {
                    return Err(Error::config(
                        ConfigErrorKind::InvalidSchema,
                        format!(
                            "edge {}.{} declares {} join columns, expected 2",
                            owner.name,
                            assoc.name,
                            cols.len()
                        ),
                    ));
                }
                None if self_ref => vec![
                    format!("{}_{owner_id}", owner.label()),
                    format!("{}_{target_id}", singular(&assoc.name)),
                ],
                None => vec![
                    format!("{}_{owner_id}", owner.label()),
                    format!("{}_{target_id}", target.label()),
                ],
            };
            Relation {
                kind,
                owner: FkOwner::JoinTable,
                table,
                columns,
                field: None,
                inverse: inverse.map(|e| e.name.clone()),
                bidi,
            }
        }
        // The dependent side of a one-to-many or one-to-one pair holds the FK.
        RelationKind::OneToMany | RelationKind::OneToOne if !bidi => {
            let label = match inverse {
                Some(inv) if self_ref => inv.name.clone(),
                _ => owner.label(),
            };
            Relation {
                kind,
                owner: FkOwner::Remote,
                table: target.table.clone(),
                columns: vec![fk_column(target, bound_field.as_ref(), declared, &label, owner_id)],
                field: bound_field,
                inverse: inverse.map(|e| e.name.clone()),
                bidi,
            }
        }
        _ => {
            let label = if self_ref {
                assoc.name.clone()
            } else {
                target.label()
            };
            Relation {
                kind,
                owner: FkOwner::Local,
                table: owner.table.clone(),
                columns: vec![fk_column(owner, bound_field.as_ref(), declared, &label, target_id)],
                field: bound_field,
                inverse: inverse.map(|e| e.name.clone()),
                bidi,
            }
        }
    };
    if let Some(inv) = inverse {
        check_declared(target, inv, kind.inverse())?;
    }
    Ok(rel)
}

/// Bound field, else declared column, else `{parent_label}_{parent_id}`.
fn fk_column(
    holder: &EntityType,
    bound: Option<&String>,
    declared: Option<Vec<String>>,
    parent_label: &str,
    parent_id: &str,
) -> String {
    if let Some(name) = bound {
        return holder
            .get_field(name)
            .map_or_else(|| name.clone(), |f| f.column.clone());
    }
    declared
        .and_then(|cols| cols.into_iter().next())
        .unwrap_or_else(|| format!("{parent_label}_{parent_id}"))
}
