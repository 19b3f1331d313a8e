//! Node lookup by opaque global identifier.

use std::collections::HashMap;

use entgraph_core::{Cx, Error, GlobalId, Outcome, Predicate, Result, Value, try_outcome, try_result};
use entgraph_query::Entity;

use crate::client::Client;

/// A decoded global id with its local id parsed by the type's id kind.
fn resolve(client: &Client, gid: &str) -> Result<(String, String, Value)> {
    let gid: GlobalId = gid.parse()?;
    let ty = client
        .graph()
        .types()
        .iter()
        .find(|t| t.name == gid.type_name)
        .ok_or_else(|| Error::not_found(gid.type_name.clone()))?;
    let (Some(column), Some(kind)) = (ty.id_column(), ty.id_kind()) else {
        return Err(Error::not_found(gid.type_name.clone()));
    };
    let id = kind.parse_id(&gid.local_id).ok_or_else(|| {
        Error::Custom(format!(
            "invalid global id: {:?} is not a valid {} id",
            gid.local_id, ty.name
        ))
    })?;
    Ok((ty.name.clone(), column.to_string(), id))
}

impl Client {
    /// The node behind a global id. Read policies and interceptors of the
    /// node's type apply.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub fn node(&self, cx: &Cx, gid: &str) -> Outcome<Entity, Error> {
        let (type_name, column, id) = try_result!(resolve(self, gid));
        self.query(type_name).where_(Predicate::eq(column, id)).only(cx)
    }

    /// The nodes behind `gids`, in input order, with `None` for ids that
    /// match no row. Issues one query per distinct type.
    #[tracing::instrument(level = "debug", skip(self, cx, gids), fields(count = gids.len()))]
    pub fn nodes(&self, cx: &Cx, gids: &[&str]) -> Outcome<Vec<Option<Entity>>, Error> {
        let mut keys = Vec::with_capacity(gids.len());
        let mut by_type: Vec<(String, String, Vec<Value>)> = Vec::new();
        for gid in gids {
            let (type_name, column, id) = try_result!(resolve(self, gid));
            match by_type.iter_mut().find(|(t, _, _)| *t == type_name) {
                Some((_, _, ids)) => {
                    if !ids.contains(&id) {
                        ids.push(id.clone());
                    }
                }
                None => by_type.push((type_name.clone(), column, vec![id.clone()])),
            }
            keys.push((type_name, id));
        }

        let mut found: HashMap<(String, Value), Entity> = HashMap::new();
        for (type_name, column, ids) in by_type {
            let nodes = try_outcome!(
                self.query(type_name.clone())
                    .where_(Predicate::is_in(column, ids))
                    .all(cx)
            );
            tracing::debug!(type_name, found = nodes.len(), "Fetched nodes");
            for node in nodes {
                if let Some(id) = node.id.clone() {
                    found.insert((type_name.clone(), id), node);
                }
            }
        }
        Outcome::Ok(keys.into_iter().map(|key| found.get(&key).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use entgraph_memory::MemoryDriver;
    use entgraph_schema::{EntityType, Field, SchemaBuilder};

    fn client() -> Client {
        let graph = SchemaBuilder::new()
            .entity(EntityType::new("User").field(Field::string("name")))
            .entity(
                EntityType::new("Doc")
                    .id(Field::string("id").immutable())
                    .field(Field::string("title")),
            )
            .build()
            .unwrap();
        let driver = Arc::new(MemoryDriver::new(&graph));
        Client::open(graph, driver).unwrap()
    }

    #[test]
    fn test_unknown_type_is_not_found() {
        let client = client();
        let gid = GlobalId::new("Nope", "1").to_string();
        let err = resolve(&client, &gid).unwrap_err();
        assert!(entgraph_core::is_not_found(&err));
    }

    #[test]
    fn test_local_id_parsed_by_kind() {
        let client = client();
        let (_, column, id) = resolve(&client, &GlobalId::new("User", "42").to_string()).unwrap();
        assert_eq!((column.as_str(), id), ("id", Value::Int(42)));
        let (_, _, id) = resolve(&client, &GlobalId::new("Doc", "a:b").to_string()).unwrap();
        assert_eq!(id, Value::from("a:b"));
        assert!(resolve(&client, &GlobalId::new("User", "x").to_string()).is_err());
    }
}
