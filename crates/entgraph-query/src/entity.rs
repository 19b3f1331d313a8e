//! The loaded entity model and the row scan contract.

use std::collections::BTreeMap;

use entgraph_core::{Error, GlobalId, QueryErrorKind, Relation, Result, Row, Value};
use entgraph_schema::EntityType;
use serde::Serialize;

/// One row of an entity type, with whatever edges were eager-loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: Option<Value>,
    /// Field values by field name.
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
    /// Resolver-emitted FK columns by column name. Not user-visible.
    #[serde(skip)]
    pub fks: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub edges: BTreeMap<String, Vec<Entity>>,
}

impl Entity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Identifier as an `i64`, for integer-keyed types.
    pub fn id_i64(&self) -> Option<i64> {
        self.id.as_ref().and_then(Value::as_i64)
    }

    /// The opaque global identifier of this row.
    pub fn global_id(&self) -> Option<GlobalId> {
        self.id
            .as_ref()
            .map(|id| GlobalId::new(self.type_name.clone(), id.to_id_string()))
    }

    /// Loaded neighbors over `edge`.
    pub fn edge(&self, edge: &str) -> Result<&[Entity]> {
        self.edges
            .get(edge)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::not_loaded(edge))
    }

    /// The single loaded neighbor over a unique `edge`.
    pub fn edge_one(&self, edge: &str) -> Result<&Entity> {
        self.edge(edge)?
            .first()
            .ok_or_else(|| Error::not_found(edge))
    }

    pub fn set_edge(&mut self, edge: impl Into<String>, neighbors: Vec<Entity>) {
        self.edges.insert(edge.into(), neighbors);
    }

    /// Value of the FK column a relation stores in this row, whether it is
    /// bound to a field or hidden.
    pub fn fk_value(&self, relation: &Relation) -> Option<&Value> {
        if let Some(field) = &relation.field {
            return self.fields.get(field);
        }
        relation.fk_column().and_then(|c| self.fks.get(c))
    }
}

/// Scan one result row into an entity of `ty`.
///
/// Columns absent from the row are left unset. NULL becomes `Value::Null`
/// for nillable fields and the kind's zero value otherwise.
pub fn scan_entity(ty: &EntityType, row: &Row) -> Result<Entity> {
    let mut entity = Entity::new(ty.name.clone());
    if let Some(id) = &ty.id {
        if let Some(raw) = row.get(&id.column) {
            let scanned = scan_column(ty, &id.name, &id.kind, raw)?;
            entity.id = scanned.filter(|v| !v.is_null());
        }
    }
    for field in &ty.fields {
        let Some(raw) = row.get(&field.column) else {
            continue;
        };
        let value = match scan_column(ty, &field.name, &field.kind, raw)? {
            Some(v) => v,
            None if field.nillable => Value::Null,
            None => field.kind.zero_value(),
        };
        entity.fields.insert(field.name.clone(), value);
    }
    for fk in ty.hidden_fk_columns() {
        if let Some(raw) = row.get(&fk.column) {
            let value = scan_column(ty, &fk.column, &fk.kind, raw)?.unwrap_or(Value::Null);
            entity.fks.insert(fk.column.clone(), value);
        }
    }
    Ok(entity)
}

fn scan_column(
    ty: &EntityType,
    name: &str,
    kind: &entgraph_core::FieldKind,
    raw: &Value,
) -> Result<Option<Value>> {
    kind.scan_target().scan(raw).map_err(|cause| {
        Error::query(
            QueryErrorKind::Execution,
            format!("scanning {}.{name}: {cause}", ty.name),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use entgraph_schema::{Edge, Field, SchemaBuilder};

    fn graph() -> entgraph_schema::Graph {
        SchemaBuilder::new()
            .entity(
                EntityType::new("User")
                    .field(Field::string("name"))
                    .field(Field::string("bio").nillable())
                    .field(Field::int("age").optional())
                    .edge(Edge::to("posts", "Post")),
            )
            .entity(
                EntityType::new("Post")
                    .field(Field::string("title"))
                    .edge(Edge::from("author", "User").reference("posts").unique()),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_scan_null_falls_back_to_zero_value() {
        let graph = graph();
        let row = Row::from_pairs([
            ("id", Value::Int(7)),
            ("name", Value::from("a")),
            ("bio", Value::Null),
            ("age", Value::Null),
        ]);
        let user = scan_entity(graph.entity("User").unwrap(), &row).unwrap();
        assert_eq!(user.id_i64(), Some(7));
        assert_eq!(user.get("bio"), Some(&Value::Null));
        assert_eq!(user.get("age"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_scan_hidden_fk() {
        let graph = graph();
        let row = Row::from_pairs([
            ("id", Value::Int(1)),
            ("title", Value::from("t")),
            ("user_id", Value::Int(7)),
        ]);
        let post = scan_entity(graph.entity("Post").unwrap(), &row).unwrap();
        assert!(post.get("user_id").is_none());
        let rel = graph.relation("Post", "author").unwrap();
        assert_eq!(post.fk_value(rel), Some(&Value::Int(7)));
    }

    #[test]
    fn test_edge_accessors() {
        let mut user = Entity::new("User");
        assert!(entgraph_core::is_not_loaded(&user.edge("posts").unwrap_err()));
        user.set_edge("posts", Vec::new());
        assert!(user.edge("posts").unwrap().is_empty());
        assert!(entgraph_core::is_not_found(&user.edge_one("posts").unwrap_err()));
    }

    #[test]
    fn test_serialize_flattens_fields() {
        let mut user = Entity::new("User");
        user.id = Some(Value::Int(1));
        user.set("name", Value::from("a"));
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["type"], "User");
        assert!(json.get("name").is_some());
        assert!(json.get("edges").is_none());
    }
}
