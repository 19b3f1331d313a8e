//! The schema graph.
//!
//! Entity types are declared with [`EntityType`] builders and assembled by
//! [`SchemaBuilder::build`], which resolves every edge, emits the hidden
//! foreign-key columns, computes field requiredness and checks that inverse
//! pairs agree. The resulting [`Graph`] is immutable and shared read-only.

use std::collections::HashMap;

use entgraph_core::{
    ConfigErrorKind, Dialect, Error, FieldKind, FkOwner, NeighborStep, Relation, RelationKind,
    Result, StepNode,
};
use serde::Serialize;

use crate::edge::Edge;
use crate::field::{Field, Requiredness};
use crate::resolve::{find_type, resolve_edge, snake_case};

/// A foreign-key column stored in an entity's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub column: String,
    /// Kind of the referenced identifier.
    pub kind: FieldKind,
    pub references_table: String,
    pub references_column: String,
    /// User field bound to the column; `None` for resolver-emitted columns.
    pub field: Option<String>,
    pub unique: bool,
    /// `(type, edge)` of the association edge the column belongs to.
    pub relation: (String, String),
}

impl ForeignKey {
    pub fn is_hidden(&self) -> bool {
        self.field.is_none()
    }
}

/// A two-column join table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinTable {
    pub table: String,
    /// `(column, referenced table, referenced column, kind)` per side.
    pub columns: Vec<(String, String, String, FieldKind)>,
}

#[derive(Debug, Clone)]
pub struct EntityType {
    pub name: String,
    pub table: String,
    pub id: Option<Field>,
    pub composite_id: Option<Vec<String>>,
    pub fields: Vec<Field>,
    pub edges: Vec<Edge>,
    /// Namespace tag; defaults to the graph's package.
    pub package: Option<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl EntityType {
    /// A type with an auto-increment `id int64` identifier and a
    /// `{snake_name}s` table.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: format!("{}s", snake_case(&name)),
            name,
            id: Some(Field::int64("id").auto_increment().immutable()),
            composite_id: None,
            fields: Vec::new(),
            edges: Vec::new(),
            package: None,
            foreign_keys: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn id(mut self, field: Field) -> Self {
        self.id = Some(field.immutable());
        self
    }

    pub fn no_id(mut self) -> Self {
        self.id = None;
        self
    }

    /// Identify rows by several fields (edge schemas). Drops the single id.
    pub fn composite_id<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id = None;
        self.composite_id = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Snake-case label used in synthesized names.
    pub fn label(&self) -> String {
        snake_case(&self.name)
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_edge(&self, name: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.name == name)
    }

    pub fn id_column(&self) -> Option<&str> {
        self.id.as_ref().map(|f| f.column.as_str())
    }

    pub fn id_kind(&self) -> Option<&FieldKind> {
        self.id.as_ref().map(|f| &f.kind)
    }

    /// Id and user-visible field columns, in declaration order.
    pub fn columns(&self) -> Vec<String> {
        self.id
            .iter()
            .chain(self.fields.iter())
            .map(|f| f.column.clone())
            .collect()
    }

    /// Resolver-emitted FK columns, not visible as fields.
    pub fn hidden_fk_columns(&self) -> impl Iterator<Item = &ForeignKey> {
        self.foreign_keys.iter().filter(|fk| fk.is_hidden())
    }

    pub fn is_composite(&self) -> bool {
        self.composite_id.is_some()
    }
}

/// Graph-wide settings.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub package: String,
    /// Dialects the graph is generated for; drives requiredness.
    pub dialects: Vec<Dialect>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            package: "entgraph".to_string(),
            dialects: vec![Dialect::Postgres],
        }
    }
}

impl GraphConfig {
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn dialects(mut self, dialects: impl Into<Vec<Dialect>>) -> Self {
        self.dialects = dialects.into();
        self
    }
}

/// Collects entity types and builds a [`Graph`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<EntityType>,
    config: GraphConfig,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn entity(mut self, ty: EntityType) -> Self {
        self.types.push(ty);
        self
    }

    #[tracing::instrument(level = "debug", skip(self), fields(types = self.types.len()))]
    pub fn build(self) -> Result<Graph> {
        let SchemaBuilder { mut types, config } = self;
        validate_declarations(&types)?;

        // Resolve against the declared (unresolved) types.
        let mut relations = Vec::with_capacity(types.len());
        for ty in &types {
            let mut per_type = Vec::with_capacity(ty.edges.len());
            for edge in &ty.edges {
                per_type.push(resolve_edge(&types, ty, edge)?);
            }
            relations.push(per_type);
        }

        let foreign_keys = collect_foreign_keys(&types, &relations)?;
        for (ty, rels) in types.iter_mut().zip(relations) {
            for (edge, rel) in ty.edges.iter_mut().zip(rels) {
                edge.inverse.clone_from(&rel.inverse);
                edge.relation = Some(rel);
            }
            if ty.package.is_none() {
                ty.package = Some(config.package.clone());
            }
            for field in &mut ty.fields {
                field.resolve_requiredness(&config.dialects);
            }
            if let Some(id) = &mut ty.id {
                id.resolve_requiredness(&config.dialects);
            }
        }
        for (table, fks) in foreign_keys {
            let Some(ty) = types.iter_mut().find(|t| t.table == table) else {
                continue;
            };
            for fk in fks {
                if let Some(bound) = fk
                    .field
                    .as_ref()
                    .and_then(|name| ty.fields.iter_mut().find(|f| &f.name == name))
                {
                    bound.edge_fk = true;
                }
                ty.foreign_keys.push(fk);
            }
        }

        let index = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        let graph = Graph {
            types,
            index,
            config,
        };
        graph.check_inverse_pairs()?;
        tracing::debug!(
            types = graph.types.len(),
            join_tables = graph.join_tables().len(),
            "schema graph built"
        );
        Ok(graph)
    }
}

fn validate_declarations(types: &[EntityType]) -> Result<()> {
    let invalid = |msg: String| Error::config(ConfigErrorKind::InvalidSchema, msg);
    let mut names = HashMap::new();
    let mut tables = HashMap::new();
    for ty in types {
        if names.insert(ty.name.as_str(), ()).is_some() {
            return Err(invalid(format!("duplicate entity type {:?}", ty.name)));
        }
        if tables.insert(ty.table.as_str(), ()).is_some() {
            return Err(invalid(format!("duplicate table {:?}", ty.table)));
        }
        let mut columns = HashMap::new();
        for field in ty.id.iter().chain(&ty.fields) {
            if columns.insert(field.column.as_str(), ()).is_some() {
                return Err(invalid(format!(
                    "duplicate column {}.{}",
                    ty.name, field.column
                )));
            }
        }
        if let Some(parts) = &ty.composite_id {
            if let Some(missing) = parts.iter().find(|p| ty.get_field(p).is_none()) {
                return Err(invalid(format!(
                    "composite id of {} names unknown field {missing:?}",
                    ty.name
                )));
            }
        }
        let mut edges = HashMap::new();
        for edge in &ty.edges {
            if edges.insert(edge.name.as_str(), ()).is_some() {
                return Err(invalid(format!("duplicate edge {}.{}", ty.name, edge.name)));
            }
            find_type(types, &edge.target)?;
            if let Some(through) = &edge.through {
                find_type(types, through)?;
            }
        }
    }
    Ok(())
}

/// FK columns per holding table, deduplicated across both ends of a pair.
fn collect_foreign_keys(
    types: &[EntityType],
    relations: &[Vec<Relation>],
) -> Result<Vec<(String, Vec<ForeignKey>)>> {
    let mut by_table: Vec<(String, Vec<ForeignKey>)> = Vec::new();
    for (ty, rels) in types.iter().zip(relations) {
        for (edge, rel) in ty.edges.iter().zip(rels) {
            let target = find_type(types, &edge.target)?;
            let (holder, parent) = match rel.owner {
                FkOwner::Local => (ty, target),
                FkOwner::Remote => (target, ty),
                FkOwner::JoinTable => continue,
            };
            let Some(column) = rel.fk_column() else {
                continue;
            };
            let (Some(parent_id), Some(parent_kind)) = (parent.id_column(), parent.id_kind())
            else {
                return Err(Error::config(
                    ConfigErrorKind::MissingIdentifier,
                    format!("{} has no identifier field", parent.name),
                ));
            };
            let relation = match &edge.reference {
                Some(assoc) => (target.name.clone(), assoc.clone()),
                None => (ty.name.clone(), edge.name.clone()),
            };
            let fk = ForeignKey {
                column: column.to_string(),
                kind: parent_kind.clone(),
                references_table: parent.table.clone(),
                references_column: parent_id.to_string(),
                field: rel.field.clone(),
                unique: rel.kind == RelationKind::OneToOne,
                relation,
            };
            check_bound_field(holder, &fk)?;

            let entry = match by_table.iter_mut().position(|(t, _)| *t == holder.table) {
                Some(i) => &mut by_table[i].1,
                None => {
                    by_table.push((holder.table.clone(), Vec::new()));
                    let last = by_table.len() - 1;
                    &mut by_table[last].1
                }
            };
            match entry.iter().find(|existing| existing.column == fk.column) {
                Some(existing) if existing.relation == fk.relation => {}
                Some(existing) => {
                    return Err(Error::config(
                        ConfigErrorKind::InvalidSchema,
                        format!(
                            "column {}.{} is claimed by edges {}.{} and {}.{}",
                            holder.table,
                            fk.column,
                            existing.relation.0,
                            existing.relation.1,
                            fk.relation.0,
                            fk.relation.1
                        ),
                    ));
                }
                None => entry.push(fk),
            }
        }
    }
    Ok(by_table)
}

fn check_bound_field(holder: &EntityType, fk: &ForeignKey) -> Result<()> {
    match &fk.field {
        Some(name) => {
            let field = holder.get_field(name).ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::InvalidSchema,
                    format!("edge field {}.{name} is not declared", holder.name),
                )
            })?;
            if field.kind != fk.kind {
                return Err(Error::config(
                    ConfigErrorKind::InvalidSchema,
                    format!(
                        "edge field {}.{name} is {} but references a {} identifier",
                        holder.name,
                        field.kind.name(),
                        fk.kind.name()
                    ),
                ));
            }
            Ok(())
        }
        None if holder.fields.iter().any(|f| f.column == fk.column) => Err(Error::config(
            ConfigErrorKind::InvalidSchema,
            format!(
                "foreign key column {}.{} collides with a field; bind it with Edge::field",
                holder.table, fk.column
            ),
        )),
        None => Ok(()),
    }
}

/// The immutable schema graph.
#[derive(Debug)]
pub struct Graph {
    types: Vec<EntityType>,
    index: HashMap<String, usize>,
    config: GraphConfig,
}

impl Graph {
    pub fn types(&self) -> &[EntityType] {
        &self.types
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn dialects(&self) -> &[Dialect] {
        &self.config.dialects
    }

    pub fn entity(&self, name: &str) -> Result<&EntityType> {
        self.index
            .get(name)
            .and_then(|i| self.types.get(*i))
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::Unknown,
                    format!("unknown entity type {name:?}"),
                )
            })
    }

    /// The entity stored in `table`.
    pub fn entity_by_table(&self, table: &str) -> Option<&EntityType> {
        self.types.iter().find(|t| t.table == table)
    }

    pub fn edge(&self, type_name: &str, edge: &str) -> Result<&Edge> {
        self.entity(type_name)?.get_edge(edge).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::Unknown,
                format!("unknown edge {type_name}.{edge}"),
            )
        })
    }

    pub fn relation(&self, type_name: &str, edge: &str) -> Result<&Relation> {
        self.edge(type_name, edge)?.relation.as_ref().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::Pipeline,
                format!("edge {type_name}.{edge} was not resolved"),
            )
        })
    }

    /// The traversal step from `type_name` over `edge`.
    pub fn step(&self, type_name: &str, edge: &str) -> Result<NeighborStep> {
        let owner = self.entity(type_name)?;
        let e = self.edge(type_name, edge)?;
        let target = self.entity(&e.target)?;
        let node = |ty: &EntityType| {
            ty.id_column()
                .map(|id| StepNode {
                    table: ty.table.clone(),
                    id_column: id.to_string(),
                })
                .ok_or_else(|| {
                    Error::config(
                        ConfigErrorKind::MissingIdentifier,
                        format!("{} has no identifier field", ty.name),
                    )
                })
        };
        Ok(NeighborStep {
            from: node(owner)?,
            to: node(target)?,
            relation: self.relation(type_name, edge)?.clone(),
        })
    }

    /// Join tables not backed by a `through` entity.
    pub fn join_tables(&self) -> Vec<JoinTable> {
        let mut out: Vec<JoinTable> = Vec::new();
        for ty in &self.types {
            for edge in &ty.edges {
                let Some(rel) = &edge.relation else { continue };
                let Some((this, other)) = rel.join_columns() else {
                    continue;
                };
                if self.entity_by_table(&rel.table).is_some()
                    || out.iter().any(|j| j.table == rel.table)
                {
                    continue;
                }
                let Ok(target) = self.entity(&edge.target) else {
                    continue;
                };
                let side = |col: &str, t: &EntityType| {
                    t.id.as_ref().map(|id| {
                        (
                            col.to_string(),
                            t.table.clone(),
                            id.column.clone(),
                            id.kind.clone(),
                        )
                    })
                };
                if let (Some(a), Some(b)) = (side(this, ty), side(other, target)) {
                    out.push(JoinTable {
                        table: rel.table.clone(),
                        columns: vec![a, b],
                    });
                }
            }
        }
        out
    }

    /// Every pair agrees on kind and on the physical descriptor.
    fn check_inverse_pairs(&self) -> Result<()> {
        for ty in &self.types {
            for edge in &ty.edges {
                let (Some(rel), Some(inverse)) = (&edge.relation, &edge.inverse) else {
                    continue;
                };
                let other = self.relation(&edge.target, inverse)?;
                if other.kind != rel.kind.inverse()
                    || other.table != rel.table
                    || other.reversed(Some(inverse.clone())).columns != rel.columns
                {
                    return Err(Error::config(
                        ConfigErrorKind::InverseMismatch,
                        format!(
                            "edges {}.{} and {}.{inverse} disagree on their relation",
                            ty.name, edge.name, edge.target
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Requiredness of `type.field` (id included) for reporting.
    pub fn requiredness(&self, type_name: &str, field: &str) -> Result<&Requiredness> {
        let ty = self.entity(type_name)?;
        ty.id
            .iter()
            .chain(&ty.fields)
            .find(|f| f.name == field)
            .map(|f| &f.requiredness)
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::Unknown,
                    format!("unknown field {type_name}.{field}"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog() -> Result<Graph> {
        SchemaBuilder::new()
            .config(GraphConfig::default().dialects(vec![Dialect::Postgres, Dialect::Sqlite]))
            .entity(
                EntityType::new("User")
                    .field(Field::string("name"))
                    .field(Field::string("bio").optional())
                    .field(Field::time("joined").db_default(Dialect::Postgres, "now()"))
                    .edge(Edge::to("posts", "Post"))
                    .edge(Edge::to("groups", "Group")),
            )
            .entity(
                EntityType::new("Post")
                    .field(Field::string("title"))
                    .edge(Edge::from("author", "User").reference("posts").unique()),
            )
            .entity(EntityType::new("Group").edge(Edge::from("users", "User").reference("groups")))
            .build()
    }

    #[test]
    fn test_build_resolves_edges_and_fks() {
        let graph = blog().unwrap();
        let posts = graph.entity("Post").unwrap();
        assert_eq!(posts.foreign_keys.len(), 1);
        let fk = &posts.foreign_keys[0];
        assert_eq!(fk.column, "user_id");
        assert!(fk.is_hidden());
        assert_eq!(fk.references_table, "users");
        assert!(graph.entity("User").unwrap().foreign_keys.is_empty());
        assert_eq!(
            graph.edge("User", "posts").unwrap().inverse.as_deref(),
            Some("author")
        );
        assert_eq!(graph.entity("User").unwrap().package.as_deref(), Some("entgraph"));
    }

    #[test]
    fn test_join_tables() {
        let graph = blog().unwrap();
        let joins = graph.join_tables();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].table, "user_groups");
        assert_eq!(joins[0].columns[0].0, "user_id");
        assert_eq!(joins[0].columns[1].1, "groups");
    }

    #[test]
    fn test_requiredness_per_dialect() {
        let graph = blog().unwrap();
        assert_eq!(
            graph.requiredness("User", "name").unwrap(),
            &Requiredness::Required
        );
        assert_eq!(
            graph.requiredness("User", "bio").unwrap(),
            &Requiredness::Optional
        );
        let joined = graph.requiredness("User", "joined").unwrap();
        assert!(!joined.is_required(Dialect::Postgres));
        assert!(joined.is_required(Dialect::Sqlite));
        assert_eq!(
            graph.requiredness("User", "id").unwrap(),
            &Requiredness::Optional
        );
    }

    #[test]
    fn test_step() {
        let graph = blog().unwrap();
        let step = graph.step("Post", "author").unwrap();
        assert_eq!(step.from.table, "posts");
        assert_eq!(step.to.table, "users");
        assert_eq!(step.relation.owner, FkOwner::Local);
    }

    #[test]
    fn test_unknown_target_fails() {
        let err = SchemaBuilder::new()
            .entity(EntityType::new("User").edge(Edge::to("pets", "Pet")))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref c) if c.kind == ConfigErrorKind::Unknown));
    }

    #[test]
    fn test_fk_column_collision_fails() {
        let err = SchemaBuilder::new()
            .entity(EntityType::new("User"))
            .entity(
                EntityType::new("Post")
                    .edge(Edge::to("author", "User").unique())
                    .edge(Edge::to("editor", "User").unique()),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref c) if c.kind == ConfigErrorKind::InvalidSchema));
    }

    #[test]
    fn test_bound_field_marked_edge_fk() {
        let graph = SchemaBuilder::new()
            .entity(EntityType::new("User").edge(Edge::to("pets", "Pet")))
            .entity(
                EntityType::new("Pet")
                    .field(Field::int64("owner_id").optional())
                    .edge(
                        Edge::from("owner", "User")
                            .reference("pets")
                            .unique()
                            .field("owner_id"),
                    ),
            )
            .build()
            .unwrap();
        let pet = graph.entity("Pet").unwrap();
        assert!(pet.get_field("owner_id").unwrap().edge_fk);
        assert_eq!(pet.hidden_fk_columns().count(), 0);
    }

    #[test]
    fn test_bound_field_kind_mismatch_fails() {
        let err = SchemaBuilder::new()
            .entity(EntityType::new("User").edge(Edge::to("pets", "Pet")))
            .entity(
                EntityType::new("Pet")
                    .field(Field::string("owner_id"))
                    .edge(
                        Edge::from("owner", "User")
                            .reference("pets")
                            .unique()
                            .field("owner_id"),
                    ),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
