//! Physical relation descriptors.
//!
//! A `Relation` is what the schema resolver derives for one edge: which side
//! physically stores the join column(s) and what they are called. Specs and
//! drivers only ever see this resolved form.

use std::fmt;

use serde::Serialize;

/// The multiplicity of an edge, seen from the edge's owner type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RelationKind {
    /// One-to-one: `User` has one `Card`.
    OneToOne,
    /// One-to-many: one `User` has many `Post`s.
    OneToMany,
    /// Many-to-one: many `Post`s belong to one `User`.
    ManyToOne,
    /// Many-to-many: `User`s have many `Group`s through a join table.
    ManyToMany,
}

impl RelationKind {
    /// The kind seen from the other end of the relation.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            RelationKind::OneToOne => RelationKind::OneToOne,
            RelationKind::OneToMany => RelationKind::ManyToOne,
            RelationKind::ManyToOne => RelationKind::OneToMany,
            RelationKind::ManyToMany => RelationKind::ManyToMany,
        }
    }

    /// True when each owner row relates to at most one target row.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self, RelationKind::OneToOne | RelationKind::ManyToOne)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::OneToOne => "O2O",
            RelationKind::OneToMany => "O2M",
            RelationKind::ManyToOne => "M2O",
            RelationKind::ManyToMany => "M2M",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which table physically stores the join column(s) of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FkOwner {
    /// The edge owner's own table holds the FK column.
    Local,
    /// The target's table holds the FK column.
    Remote,
    /// A separate two-column join table.
    JoinTable,
}

/// Resolved storage of one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub owner: FkOwner,
    /// Table that holds the column(s): owner table, target table or join table.
    pub table: String,
    /// `[fk]` for `Local`/`Remote`; `[this_side, other_side]` for `JoinTable`.
    pub columns: Vec<String>,
    /// User-visible field bound to the FK column, if any.
    pub field: Option<String>,
    /// Name of the inverse edge on the target type.
    pub inverse: Option<String>,
    /// Self-referential relation stored once and readable from both ends.
    pub bidi: bool,
}

impl Relation {
    /// The single FK column for `Local`/`Remote` relations.
    #[must_use]
    pub fn fk_column(&self) -> Option<&str> {
        match self.owner {
            FkOwner::Local | FkOwner::Remote => self.columns.first().map(String::as_str),
            FkOwner::JoinTable => None,
        }
    }

    /// `(this_side, other_side)` columns of a join table.
    #[must_use]
    pub fn join_columns(&self) -> Option<(&str, &str)> {
        match (self.owner, self.columns.as_slice()) {
            (FkOwner::JoinTable, [this, other]) => Some((this.as_str(), other.as_str())),
            _ => None,
        }
    }

    /// The same storage seen from the other end of the relation.
    #[must_use]
    pub fn reversed(&self, inverse_name: Option<String>) -> Self {
        let owner = match self.owner {
            FkOwner::Local => FkOwner::Remote,
            FkOwner::Remote => FkOwner::Local,
            FkOwner::JoinTable => FkOwner::JoinTable,
        };
        let mut columns = self.columns.clone();
        if owner == FkOwner::JoinTable {
            columns.reverse();
        }
        Self {
            kind: self.kind.inverse(),
            owner,
            table: self.table.clone(),
            columns,
            field: self.field.clone(),
            inverse: inverse_name,
            bidi: self.bidi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn o2m() -> Relation {
        Relation {
            kind: RelationKind::OneToMany,
            owner: FkOwner::Remote,
            table: "posts".into(),
            columns: vec!["user_id".into()],
            field: None,
            inverse: Some("author".into()),
            bidi: false,
        }
    }

    #[test]
    fn test_kind_inverse_pairs() {
        assert_eq!(RelationKind::OneToMany.inverse(), RelationKind::ManyToOne);
        assert_eq!(RelationKind::OneToOne.inverse(), RelationKind::OneToOne);
        assert_eq!(RelationKind::ManyToMany.inverse(), RelationKind::ManyToMany);
    }

    #[test]
    fn test_reversed_flips_owner_and_kind() {
        let rel = o2m();
        let back = rel.reversed(Some("posts".into()));
        assert_eq!(back.kind, RelationKind::ManyToOne);
        assert_eq!(back.owner, FkOwner::Local);
        assert_eq!(back.fk_column(), Some("user_id"));
        assert_eq!(back.table, "posts");
    }

    #[test]
    fn test_reversed_join_table_flips_columns() {
        let rel = Relation {
            kind: RelationKind::ManyToMany,
            owner: FkOwner::JoinTable,
            table: "user_groups".into(),
            columns: vec!["user_id".into(), "group_id".into()],
            field: None,
            inverse: None,
            bidi: false,
        };
        let back = rel.reversed(None);
        assert_eq!(back.join_columns(), Some(("group_id", "user_id")));
        assert_eq!(rel.join_columns(), Some(("user_id", "group_id")));
    }
}
