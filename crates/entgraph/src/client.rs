//! The client: one graph, one driver, one registry.

use std::sync::Arc;

use entgraph_core::{ConfigErrorKind, DebugDriver, Dialect, Driver, Error, Result, Value};
use entgraph_mutation::{
    CreateBuilder, CreateBulkBuilder, DeleteBuilder, DeleteOneBuilder, MutationEnv, UpdateBuilder,
    UpdateOneBuilder,
};
use entgraph_query::{QueryBuilder, QueryEnv};
use entgraph_schema::Graph;

use crate::registry::Registry;

/// Client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Dialect the driver must speak. `None` accepts the driver's dialect as
    /// long as the graph is configured for it.
    pub dialect: Option<Dialect>,
    /// Wrap the driver in a [`DebugDriver`] that logs every call.
    pub debug: bool,
}

impl ClientConfig {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Entry point for every query and mutation.
///
/// Cloning is cheap; clones share the graph, driver and registry.
#[derive(Debug, Clone)]
pub struct Client {
    env: MutationEnv,
    config: ClientConfig,
}

impl Client {
    /// Build a client. Fails when the driver speaks a dialect the graph is
    /// not configured for, or not the one `config` asks for.
    pub fn new(
        graph: impl Into<Arc<Graph>>,
        driver: Arc<dyn Driver>,
        registry: Registry,
        config: ClientConfig,
    ) -> Result<Self> {
        let graph = graph.into();
        let dialect = driver.dialect();
        if let Some(wanted) = config.dialect {
            if wanted != dialect {
                return Err(Error::config(
                    ConfigErrorKind::InvalidSchema,
                    format!("client expects {wanted} but the driver speaks {dialect}"),
                ));
            }
        }
        if !graph.dialects().contains(&dialect) {
            return Err(Error::config(
                ConfigErrorKind::InvalidSchema,
                format!("graph is not configured for the {dialect} dialect"),
            ));
        }
        let driver: Arc<dyn Driver> = if config.debug {
            Arc::new(DebugDriver::new(driver))
        } else {
            driver
        };
        let (hooks, interceptors) = registry.into_parts();
        let query = QueryEnv::new(graph, driver).with_interceptors(interceptors);
        tracing::debug!(%dialect, debug = config.debug, "Client ready");
        Ok(Self {
            env: MutationEnv::new(query, hooks),
            config,
        })
    }

    /// A client with an empty registry and default configuration.
    pub fn open(graph: impl Into<Arc<Graph>>, driver: Arc<dyn Driver>) -> Result<Self> {
        Self::new(graph, driver, Registry::default(), ClientConfig::default())
    }

    pub fn graph(&self) -> &Arc<Graph> {
        self.env.graph()
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        self.env.driver()
    }

    pub fn dialect(&self) -> Dialect {
        self.env.dialect()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn query(&self, type_name: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(self.env.query.clone(), type_name)
    }

    pub fn create(&self, type_name: impl Into<String>) -> CreateBuilder {
        CreateBuilder::new(self.env.clone(), type_name)
    }

    /// Bulk-create the given rows, all of one type, in one round trip.
    pub fn create_bulk<I>(&self, builders: I) -> CreateBulkBuilder
    where
        I: IntoIterator<Item = CreateBuilder>,
    {
        CreateBulkBuilder::new(self.env.clone(), builders.into_iter().collect())
    }

    pub fn update(&self, type_name: impl Into<String>) -> UpdateBuilder {
        UpdateBuilder::new(self.env.clone(), type_name)
    }

    pub fn update_one(&self, type_name: impl Into<String>, id: impl Into<Value>) -> UpdateOneBuilder {
        UpdateOneBuilder::new(self.env.clone(), type_name, id)
    }

    pub fn delete(&self, type_name: impl Into<String>) -> DeleteBuilder {
        DeleteBuilder::new(self.env.clone(), type_name)
    }

    pub fn delete_one(&self, type_name: impl Into<String>, id: impl Into<Value>) -> DeleteOneBuilder {
        DeleteOneBuilder::new(self.env.clone(), type_name, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entgraph_memory::MemoryDriver;
    use entgraph_schema::{EntityType, Field, GraphConfig, SchemaBuilder};

    fn graph(dialects: Vec<Dialect>) -> Graph {
        SchemaBuilder::new()
            .config(GraphConfig::default().dialects(dialects))
            .entity(EntityType::new("User").field(Field::string("name")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_rejects_unconfigured_dialect() {
        let g = graph(vec![Dialect::Postgres]);
        let driver = Arc::new(MemoryDriver::with_dialect(&g, Dialect::Mysql));
        let err = Client::open(g, driver).unwrap_err();
        assert!(err.to_string().contains("mysql"), "{err}");
    }

    #[test]
    fn test_config_dialect_must_match_driver() {
        let g = Arc::new(graph(vec![Dialect::Postgres, Dialect::Sqlite]));
        let driver: Arc<dyn Driver> = Arc::new(MemoryDriver::with_dialect(&g, Dialect::Sqlite));
        let config = ClientConfig::default().dialect(Dialect::Postgres);
        assert!(Client::new(Arc::clone(&g), Arc::clone(&driver), Registry::new(), config).is_err());

        let config = ClientConfig::default().dialect(Dialect::Sqlite).debug(true);
        let client = Client::new(g, driver, Registry::new(), config).unwrap();
        assert_eq!(client.dialect(), Dialect::Sqlite);
        assert!(client.config().debug);
    }
}
