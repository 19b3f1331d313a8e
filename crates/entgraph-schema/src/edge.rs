//! Edge declarations.
//!
//! An edge is declared either as an association (`Edge::to`) or as the
//! inverse of an association on the target type (`Edge::from(..).reference(..)`).
//! The resolver fills `relation` and `inverse` when the graph is built.

use entgraph_core::{Relation, RelationKind};

/// Explicit storage for an edge: join table and/or column names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeStorage {
    pub table: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub name: String,
    /// Target entity type name.
    pub target: String,
    pub unique: bool,
    pub optional: bool,
    pub immutable: bool,
    /// For inverse edges: name of the association edge on the target type.
    pub reference: Option<String>,
    /// Kind asserted by the schema author; checked against the resolved one.
    pub declared_kind: Option<RelationKind>,
    pub storage: Option<EdgeStorage>,
    /// User field that stores this edge's foreign key.
    pub field: Option<String>,
    /// Entity type backing the join table of a many-to-many edge.
    pub through: Option<String>,
    /// Resolved storage, seen from this edge's owner.
    pub relation: Option<Relation>,
    /// Resolved name of the counterpart edge on the target type.
    pub inverse: Option<String>,
}

impl Edge {
    /// An association edge owned by the declaring type.
    pub fn to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            unique: false,
            optional: true,
            immutable: false,
            reference: None,
            declared_kind: None,
            storage: None,
            field: None,
            through: None,
            relation: None,
            inverse: None,
        }
    }

    /// An inverse edge; pair with [`Edge::reference`].
    pub fn from(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::to(name, target)
    }

    /// Name the association edge on the target this edge is the inverse of.
    pub fn reference(mut self, assoc: impl Into<String>) -> Self {
        self.reference = Some(assoc.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn kind(mut self, kind: RelationKind) -> Self {
        self.declared_kind = Some(kind);
        self
    }

    /// Bind the edge to a user-declared foreign key field.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn through(mut self, type_name: impl Into<String>) -> Self {
        self.through = Some(type_name.into());
        self
    }

    pub fn storage_table(mut self, table: impl Into<String>) -> Self {
        self.storage.get_or_insert_with(EdgeStorage::default).table = Some(table.into());
        self
    }

    pub fn storage_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.storage.get_or_insert_with(EdgeStorage::default).columns =
            columns.into_iter().map(Into::into).collect();
        self
    }

    /// True for edges declared with [`Edge::reference`].
    pub fn is_inverse(&self) -> bool {
        self.reference.is_some()
    }

    pub(crate) fn declared_columns(&self) -> Option<&[String]> {
        self.storage
            .as_ref()
            .map(|s| s.columns.as_slice())
            .filter(|c| !c.is_empty())
    }
}
