//! Steps shared by every mutation builder: defaults, checks, spec
//! construction and identifier read-back.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use entgraph_core::{
    ConfigErrorKind, CreateSpec, Dialect, Driver, EdgeMutation, EdgeOp, EdgeSpec, Error,
    FieldSpec, FkOwner, IdSpec, Outcome, Predicate, Result, UpdateSpec, ValidationError, Value,
};
use entgraph_query::{Entity, QueryEnv};
use entgraph_schema::{EntityType, Graph};

use crate::hook::HookRegistry;
use crate::mutation::{Mutation, Op};

/// What every mutation needs to run.
#[derive(Clone, Debug)]
pub struct MutationEnv {
    pub query: QueryEnv,
    pub hooks: Arc<HookRegistry>,
}

impl MutationEnv {
    pub fn new(query: QueryEnv, hooks: Arc<HookRegistry>) -> Self {
        Self { query, hooks }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.query.graph
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.query.driver
    }

    pub fn dialect(&self) -> Dialect {
        self.query.driver.dialect()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fill unset fields from their defaults: `default` on create,
/// `update_default` on update. Fields set or cleared explicitly are kept.
pub(crate) fn apply_defaults(ty: &EntityType, m: &mut Mutation) -> Result<()> {
    match m.op() {
        Op::Create => {
            if let Some(id) = &ty.id {
                if m.id().is_none() {
                    if let Some(default) = &id.default {
                        m.set_id(default.value())?;
                    }
                }
            }
            for field in &ty.fields {
                if m.field(&field.name).is_some() || m.field_cleared(&field.name) {
                    continue;
                }
                if let Some(default) = &field.default {
                    m.set_field(field.name.clone(), default.value())?;
                }
            }
        }
        Op::Update | Op::UpdateOne => {
            for field in &ty.fields {
                if m.field(&field.name).is_some() || m.field_cleared(&field.name) {
                    continue;
                }
                if let Some(default) = &field.update_default {
                    m.set_field(field.name.clone(), default.value())?;
                }
            }
        }
        Op::Delete | Op::DeleteOne => {}
    }
    Ok(())
}

fn edge_present(graph: &Graph, ty: &EntityType, edge: &str, m: &Mutation) -> bool {
    if !m.edge_ids(edge).is_empty() {
        return true;
    }
    graph
        .relation(&ty.name, edge)
        .ok()
        .and_then(|rel| rel.field.as_deref())
        .and_then(|field| m.field(field))
        .is_some_and(|v| !v.is_null())
}

/// Required fields, field values and required edges of a create. The first
/// failure wins.
pub(crate) fn check_create(
    graph: &Graph,
    ty: &EntityType,
    m: &Mutation,
    dialect: Dialect,
) -> Result<()> {
    if let (Some(field), Some(id)) = (&ty.id, m.id()) {
        field.check_value(&ty.name, id)?;
    }
    for field in &ty.fields {
        match m.field(&field.name) {
            Some(value) => field.check_value(&ty.name, value)?,
            None if field.is_required(dialect) => {
                return Err(ValidationError::missing_field(&ty.name, &field.name).into());
            }
            None => {}
        }
    }
    for edge in &ty.edges {
        if !edge.optional && !edge_present(graph, ty, &edge.name, m) {
            return Err(ValidationError::missing_edge(&ty.name, &edge.name).into());
        }
    }
    Ok(())
}

/// Field values, increments, clears and edge changes of an update.
pub(crate) fn check_update(ty: &EntityType, m: &Mutation) -> Result<()> {
    let immutable = |name: &str| {
        Error::from(ValidationError::new(
            name,
            format!("field \"{}.{name}\" is immutable", ty.name),
        ))
    };
    for (name, value) in m.fields() {
        let field = known_field(ty, name)?;
        if field.immutable {
            return Err(immutable(name));
        }
        field.check_value(&ty.name, value)?;
    }
    for (name, delta) in m.added_fields() {
        let field = known_field(ty, name)?;
        if field.immutable {
            return Err(immutable(name));
        }
        if !field.kind.is_numeric() || !(delta.as_i64().is_some() || delta.as_f64().is_some()) {
            return Err(ValidationError::new(
                name,
                format!("field \"{}.{name}\" cannot be incremented by {delta}", ty.name),
            )
            .into());
        }
    }
    for name in m.cleared_fields() {
        let field = known_field(ty, name)?;
        if !field.optional && !field.nillable {
            return Err(ValidationError::new(
                name,
                format!("required field \"{}.{name}\" cannot be cleared", ty.name),
            )
            .into());
        }
    }
    for edge in &ty.edges {
        let touched = m.edge_cleared(&edge.name)
            || !m.edge_ids(&edge.name).is_empty()
            || !m.removed_edge_ids(&edge.name).is_empty();
        if touched && edge.immutable {
            return Err(ValidationError::new(
                edge.name.clone(),
                format!("edge \"{}.{}\" is immutable", ty.name, edge.name),
            )
            .into());
        }
        if edge.unique
            && !edge.optional
            && m.edge_cleared(&edge.name)
            && m.edge_ids(&edge.name).is_empty()
        {
            return Err(ValidationError::new(
                edge.name.clone(),
                format!("clearing a required unique edge \"{}.{}\"", ty.name, edge.name),
            )
            .into());
        }
    }
    Ok(())
}

fn known_field<'a>(ty: &'a EntityType, name: &str) -> Result<&'a entgraph_schema::Field> {
    ty.get_field(name).ok_or_else(|| {
        Error::config(
            ConfigErrorKind::Unknown,
            format!("unknown field {}.{name}", ty.name),
        )
    })
}

fn set_column(fields: &mut Vec<FieldSpec>, spec: FieldSpec) {
    match fields.iter_mut().find(|f| f.column == spec.column) {
        Some(existing) => *existing = spec,
        None => fields.push(spec),
    }
}

fn target_id_kind(graph: &Graph, ty: &EntityType, edge: &str) -> Result<entgraph_core::FieldKind> {
    let target = graph.entity(&graph.edge(&ty.name, edge)?.target)?;
    target.id_kind().cloned().ok_or_else(|| {
        Error::config(
            ConfigErrorKind::MissingIdentifier,
            format!("{} has no identifier field", target.name),
        )
    })
}

/// The insert spec for a create mutation.
pub(crate) fn create_spec(graph: &Graph, ty: &EntityType, m: &Mutation) -> Result<CreateSpec> {
    let mut spec = CreateSpec::new(ty.table.clone());
    if let Some(id) = &ty.id {
        spec.id = Some(IdSpec {
            column: id.column.clone(),
            kind: id.kind.clone(),
            auto_increment: id.auto_increment,
            value: m.id().cloned(),
        });
    }
    for field in &ty.fields {
        if let Some(value) = m.field(&field.name) {
            spec.fields.push(FieldSpec::new(
                field.column.clone(),
                field.kind.clone(),
                value.clone(),
            ));
        }
    }
    for (edge, ids) in m.added_edges() {
        let step = graph.step(&ty.name, edge)?;
        match step.relation.owner {
            FkOwner::Local => {
                let (Some(column), Some(id)) = (step.relation.fk_column(), ids.last()) else {
                    continue;
                };
                let kind = target_id_kind(graph, ty, edge)?;
                set_column(&mut spec.fields, FieldSpec::new(column, kind, id.clone()));
                if step.relation.bidi {
                    spec.edges.push(EdgeSpec {
                        relation: step.relation.clone(),
                        target: step.to.clone(),
                        ids: vec![id.clone()],
                    });
                }
            }
            FkOwner::Remote | FkOwner::JoinTable => spec.edges.push(EdgeSpec {
                relation: step.relation,
                target: step.to,
                ids: ids.to_vec(),
            }),
        }
    }
    Ok(spec)
}

/// Columns an insert writes, for upsert resolution.
pub(crate) fn insert_columns(spec: &CreateSpec) -> Vec<String> {
    let mut columns: Vec<String> = spec
        .id
        .iter()
        .filter(|id| id.value.is_some())
        .map(|id| id.column.clone())
        .collect();
    columns.extend(spec.fields.iter().map(|f| f.column.clone()));
    columns
}

/// The update spec. `UpdateOne` is narrowed to the mutation's id.
pub(crate) fn update_spec(graph: &Graph, ty: &EntityType, m: &Mutation) -> Result<UpdateSpec> {
    let mut spec = UpdateSpec::new(ty.table.clone());
    spec.id_column = ty.id_column().map(str::to_string);
    let mut preds = Vec::new();
    if m.op() == Op::UpdateOne {
        let (Some(column), Some(id)) = (ty.id_column(), m.id()) else {
            return Err(Error::config(
                ConfigErrorKind::MissingIdentifier,
                format!("update of one {} without an id", ty.name),
            ));
        };
        preds.push(Predicate::eq(column, id.clone()));
    }
    preds.extend(m.predicates().iter().cloned());
    if !preds.is_empty() {
        spec.predicate = Some(Predicate::and(preds));
    }
    for (name, value) in m.fields() {
        let field = known_field(ty, name)?;
        spec.set.push(FieldSpec::new(
            field.column.clone(),
            field.kind.clone(),
            value.clone(),
        ));
    }
    for (name, delta) in m.added_fields() {
        let field = known_field(ty, name)?;
        spec.add.push(FieldSpec::new(
            field.column.clone(),
            field.kind.clone(),
            delta.clone(),
        ));
    }
    for name in m.cleared_fields() {
        spec.clear.push(known_field(ty, name)?.column.clone());
    }

    let edge_mutation = |op, step: &entgraph_core::NeighborStep, ids: &[Value]| EdgeMutation {
        op,
        spec: EdgeSpec {
            relation: step.relation.clone(),
            target: step.to.clone(),
            ids: ids.to_vec(),
        },
    };
    for edge in m.cleared_edges() {
        let step = graph.step(&ty.name, edge)?;
        if step.relation.owner == FkOwner::Local && !step.relation.bidi {
            if let Some(column) = step.relation.fk_column() {
                if !spec.clear.iter().any(|c| c == column) {
                    spec.clear.push(column.to_string());
                }
            }
            continue;
        }
        spec.edges.push(edge_mutation(EdgeOp::Clear, &step, &[]));
    }
    for (edge, ids) in m.removed_edges() {
        let step = graph.step(&ty.name, edge)?;
        spec.edges.push(edge_mutation(EdgeOp::Remove, &step, ids));
    }
    for (edge, ids) in m.added_edges() {
        let step = graph.step(&ty.name, edge)?;
        let unique = graph.edge(&ty.name, edge)?.unique;
        match step.relation.owner {
            FkOwner::Local => {
                let (Some(column), Some(id)) = (step.relation.fk_column(), ids.last()) else {
                    continue;
                };
                spec.clear.retain(|c| c != column);
                let kind = target_id_kind(graph, ty, edge)?;
                set_column(&mut spec.set, FieldSpec::new(column, kind, id.clone()));
                if step.relation.bidi {
                    spec.edges.push(edge_mutation(EdgeOp::Add, &step, &ids[ids.len() - 1..]));
                }
            }
            FkOwner::Remote | FkOwner::JoinTable => {
                if unique && !m.edge_cleared(edge) {
                    spec.edges.push(edge_mutation(EdgeOp::Clear, &step, &[]));
                }
                spec.edges.push(edge_mutation(EdgeOp::Add, &step, ids));
            }
        }
    }
    spec.columns = ty.columns();
    for fk in &ty.foreign_keys {
        if !spec.columns.contains(&fk.column) {
            spec.columns.push(fk.column.clone());
        }
    }
    Ok(spec)
}

/// The identifier the driver wrote back, if it has the identifier's kind.
pub(crate) fn read_id(ty: &EntityType, spec: &CreateSpec) -> Option<Value> {
    let field = ty.id.as_ref()?;
    let value = spec.id.as_ref()?.value.as_ref()?;
    if value.is_null() {
        return None;
    }
    match field.kind.accepts(value) {
        Ok(()) => Some(value.clone()),
        Err(cause) => {
            tracing::warn!(type_name = %ty.name, %cause, "Driver returned an unusable identifier");
            None
        }
    }
}

/// The node a successful create produced, without another round trip.
pub(crate) fn entity_from_mutation(graph: &Graph, ty: &EntityType, m: &Mutation) -> Entity {
    let mut node = Entity::new(ty.name.clone());
    node.id = m.id().cloned();
    for field in &ty.fields {
        let value = match m.field(&field.name) {
            Some(v) => v.clone(),
            None if field.nillable || m.field_cleared(&field.name) => Value::Null,
            None => field.kind.zero_value(),
        };
        node.fields.insert(field.name.clone(), value);
    }
    for (edge, ids) in m.added_edges() {
        let Ok(rel) = graph.relation(&ty.name, edge) else {
            continue;
        };
        if rel.owner != FkOwner::Local || rel.field.is_some() {
            continue;
        }
        if let (Some(column), Some(id)) = (rel.fk_column(), ids.last()) {
            node.fks.insert(column.to_string(), id.clone());
        }
    }
    node
}

/// Surface backend constraint violations as `Error::Constraint`.
pub(crate) fn wrap_constraint<T>(outcome: Outcome<T, Error>) -> Outcome<T, Error> {
    match outcome {
        Outcome::Err(e) => Outcome::Err(e.into_constraint_if_violation()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entgraph_schema::{Edge, Field, SchemaBuilder, Validator};

    fn graph() -> Graph {
        SchemaBuilder::new()
            .entity(
                EntityType::new("User")
                    .field(Field::string("name").validate(Validator::NotEmpty))
                    .field(Field::string("bio").optional())
                    .field(Field::enumeration("role", ["admin", "member"]).default("member"))
                    .field(Field::int("age").optional())
                    .field(Field::time("created_at").default_fn(|| Value::Timestamp(42)).immutable())
                    .edge(Edge::to("posts", "Post"))
                    .edge(Edge::to("groups", "Group")),
            )
            .entity(
                EntityType::new("Post")
                    .field(Field::string("title"))
                    .edge(Edge::from("author", "User").reference("posts").unique().required()),
            )
            .entity(EntityType::new("Group").edge(Edge::from("users", "User").reference("groups")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults_do_not_override() {
        let graph = graph();
        let user = graph.entity("User").unwrap();
        let mut m = Mutation::new("User", Op::Create);
        m.set_field("role", Value::from("admin")).unwrap();
        apply_defaults(user, &mut m).unwrap();
        assert_eq!(m.field("role"), Some(&Value::from("admin")));
        assert_eq!(m.field("created_at"), Some(&Value::Timestamp(42)));
    }

    #[test]
    fn test_check_create_first_failure_wins() {
        let graph = graph();
        let user = graph.entity("User").unwrap();
        let m = Mutation::new("User", Op::Create);
        let err = check_create(&graph, user, &m, Dialect::Postgres).unwrap_err();
        let Error::Validation(v) = err else {
            panic!("expected a validation error");
        };
        assert_eq!(v.name, "name");

        let mut m = Mutation::new("User", Op::Create);
        m.set_field("name", Value::from("")).unwrap();
        m.set_field("role", Value::from("owner")).unwrap();
        let Error::Validation(v) = check_create(&graph, user, &m, Dialect::Postgres).unwrap_err()
        else {
            panic!("expected a validation error");
        };
        assert_eq!(v.name, "name");
    }

    #[test]
    fn test_check_create_required_edge() {
        let graph = graph();
        let post = graph.entity("Post").unwrap();
        let mut m = Mutation::new("Post", Op::Create);
        m.set_field("title", Value::from("t")).unwrap();
        let Error::Validation(v) = check_create(&graph, post, &m, Dialect::Sqlite).unwrap_err()
        else {
            panic!("expected a validation error");
        };
        assert_eq!(v.name, "author");
        m.set_edge_id("author", Value::Int(1)).unwrap();
        assert!(check_create(&graph, post, &m, Dialect::Sqlite).is_ok());
    }

    #[test]
    fn test_check_update_rejects_immutable_and_required_clear() {
        let graph = graph();
        let user = graph.entity("User").unwrap();
        let mut m = Mutation::new("User", Op::UpdateOne);
        m.set_field("created_at", Value::Timestamp(1)).unwrap();
        assert!(check_update(user, &m).is_err());

        let mut m = Mutation::new("User", Op::UpdateOne);
        m.clear_field("name").unwrap();
        assert!(check_update(user, &m).is_err());

        let mut m = Mutation::new("User", Op::UpdateOne);
        m.clear_field("bio").unwrap();
        m.add_field("age", Value::Int(1)).unwrap();
        assert!(check_update(user, &m).is_ok());
    }

    #[test]
    fn test_create_spec_local_edge_becomes_column() {
        let graph = graph();
        let post = graph.entity("Post").unwrap();
        let mut m = Mutation::new("Post", Op::Create);
        m.set_field("title", Value::from("t")).unwrap();
        m.set_edge_id("author", Value::Int(9)).unwrap();
        let spec = create_spec(&graph, post, &m).unwrap();
        assert!(spec.edges.is_empty());
        assert_eq!(spec.fields[1].column, "user_id");
        assert_eq!(spec.fields[1].value, Value::Int(9));
        assert_eq!(insert_columns(&spec), vec!["title", "user_id"]);
    }

    #[test]
    fn test_create_spec_remote_and_join_edges() {
        let graph = graph();
        let user = graph.entity("User").unwrap();
        let mut m = Mutation::new("User", Op::Create);
        m.set_field("name", Value::from("a")).unwrap();
        m.add_edge_ids("posts", [Value::Int(1), Value::Int(2)]).unwrap();
        m.add_edge_ids("groups", [Value::Int(3)]).unwrap();
        let spec = create_spec(&graph, user, &m).unwrap();
        assert_eq!(spec.edges.len(), 2);
        assert_eq!(spec.edges[0].relation.owner, FkOwner::JoinTable);
        assert_eq!(spec.edges[1].relation.owner, FkOwner::Remote);
        assert_eq!(spec.edges[1].ids.len(), 2);
    }

    #[test]
    fn test_update_spec_one() {
        let graph = graph();
        let user = graph.entity("User").unwrap();
        let mut m = Mutation::new("User", Op::UpdateOne);
        m.set_id(Value::Int(5)).unwrap();
        m.set_field("name", Value::from("b")).unwrap();
        m.add_field("age", Value::Int(1)).unwrap();
        m.clear_edge("groups").unwrap();
        let spec = update_spec(&graph, user, &m).unwrap();
        assert_eq!(spec.predicate, Some(Predicate::eq("id", 5_i64)));
        assert_eq!(spec.set[0].column, "name");
        assert_eq!(spec.add[0].value, Value::Int(1));
        assert_eq!(spec.edges[0].op, EdgeOp::Clear);
        assert!(!spec.is_empty());
    }

    #[test]
    fn test_read_id_is_checked() {
        let graph = graph();
        let user = graph.entity("User").unwrap();
        let mut spec = CreateSpec::new("users");
        assert_eq!(read_id(user, &spec), None);
        spec.id = Some(IdSpec {
            column: "id".into(),
            kind: entgraph_core::FieldKind::Int64,
            auto_increment: true,
            value: Some(Value::from("not-a-number")),
        });
        assert_eq!(read_id(user, &spec), None);
        if let Some(id) = spec.id.as_mut() {
            id.value = Some(Value::Int(3));
        }
        assert_eq!(read_id(user, &spec), Some(Value::Int(3)));
    }

    #[test]
    fn test_entity_from_mutation_zero_values() {
        let graph = graph();
        let user = graph.entity("User").unwrap();
        let mut m = Mutation::new("User", Op::Create);
        m.set_field("name", Value::from("a")).unwrap();
        m.finish(Some(Value::Int(1)));
        let node = entity_from_mutation(&graph, user, &m);
        assert_eq!(node.id, Some(Value::Int(1)));
        assert_eq!(node.get("bio"), Some(&Value::Text(String::new())));
        assert_eq!(node.get("age"), Some(&Value::Int(0)));
    }
}
