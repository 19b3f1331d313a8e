//! Artifact generation over a bounded worker pool.
//!
//! One task is scheduled per (entity type × artifact). Workers claim tasks
//! from a shared atomic cursor; the first failing task stops every worker
//! from claiming more and its error is returned. The graph is read-only, so
//! workers share it without locking.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use entgraph_core::{Dialect, Error, Result};
use serde_json::json;

use crate::ddl;
use crate::graph::{EntityType, Graph};

/// One rendered output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: String,
    pub contents: String,
}

/// Something rendered once per entity type.
pub trait Artifact: Send + Sync {
    fn name(&self) -> &str;
    fn render(&self, graph: &Graph, ty: &EntityType) -> Result<GeneratedFile>;
}

/// `CREATE TABLE` for the type, plus the join tables it owns.
#[derive(Debug, Clone, Copy)]
pub struct DdlArtifact {
    pub dialect: Dialect,
}

impl Artifact for DdlArtifact {
    fn name(&self) -> &str {
        "ddl"
    }

    fn render(&self, graph: &Graph, ty: &EntityType) -> Result<GeneratedFile> {
        let mut stmts = vec![ddl::create_table(ty, self.dialect)];
        // Join tables are attributed to the type whose edge names them first.
        let owned: Vec<String> = ty
            .edges
            .iter()
            .filter(|e| !e.is_inverse())
            .filter_map(|e| e.relation.as_ref())
            .filter(|r| r.join_columns().is_some())
            .map(|r| r.table.clone())
            .collect();
        stmts.extend(
            graph
                .join_tables()
                .iter()
                .filter(|jt| owned.contains(&jt.table))
                .map(|jt| ddl::create_join_table(jt, self.dialect)),
        );
        Ok(GeneratedFile {
            path: format!("{}/{}.{}.sql", package(graph, ty), ty.label(), self.dialect),
            contents: stmts.join(";\n") + ";\n",
        })
    }
}

/// JSON description of the type's columns and resolved relations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestArtifact;

impl Artifact for ManifestArtifact {
    fn name(&self) -> &str {
        "manifest"
    }

    fn render(&self, graph: &Graph, ty: &EntityType) -> Result<GeneratedFile> {
        let fields: Vec<_> = ty
            .id
            .iter()
            .chain(&ty.fields)
            .map(|f| {
                json!({
                    "name": f.name,
                    "column": f.column,
                    "kind": f.kind,
                    "optional": f.optional,
                    "nillable": f.nillable,
                    "unique": f.unique,
                    "immutable": f.immutable,
                    "validators": f.validator_count(),
                    "edge_fk": f.edge_fk,
                })
            })
            .collect();
        let mut edges = Vec::with_capacity(ty.edges.len());
        for edge in &ty.edges {
            let rel = graph.relation(&ty.name, &edge.name)?;
            edges.push(json!({
                "name": edge.name,
                "target": edge.target,
                "unique": edge.unique,
                "optional": edge.optional,
                "inverse": edge.inverse,
                "relation": rel,
            }));
        }
        let manifest = json!({
            "type": ty.name,
            "table": ty.table,
            "package": package(graph, ty),
            "composite_id": ty.composite_id,
            "fields": fields,
            "edges": edges,
            "foreign_keys": ty.foreign_keys,
        });
        let contents = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Error::Custom(format!("manifest for {}: {e}", ty.name)))?;
        Ok(GeneratedFile {
            path: format!("{}/{}.json", package(graph, ty), ty.label()),
            contents,
        })
    }
}

fn package<'a>(graph: &'a Graph, ty: &'a EntityType) -> &'a str {
    ty.package.as_deref().unwrap_or(&graph.config().package)
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Worker threads; defaults to the available parallelism.
    pub workers: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, usize::from),
        }
    }
}

impl GeneratorConfig {
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Counters updated by the workers.
#[derive(Debug, Default)]
pub struct GeneratorMetrics {
    completed: AtomicUsize,
}

impl GeneratorMetrics {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }
}

pub struct Generator<'g> {
    graph: &'g Graph,
    artifacts: Vec<Box<dyn Artifact>>,
    config: GeneratorConfig,
    metrics: GeneratorMetrics,
}

impl<'g> Generator<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            artifacts: Vec::new(),
            config: GeneratorConfig::default(),
            metrics: GeneratorMetrics::default(),
        }
    }

    pub fn config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn artifact(mut self, artifact: impl Artifact + 'static) -> Self {
        self.artifacts.push(Box::new(artifact));
        self
    }

    pub fn metrics(&self) -> &GeneratorMetrics {
        &self.metrics
    }

    /// Render every (type × artifact) pair. Output order is deterministic:
    /// by type, then by artifact registration order.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn generate(&self) -> Result<Vec<GeneratedFile>> {
        let types = self.graph.types();
        let tasks: Vec<(usize, usize)> = (0..types.len())
            .flat_map(|t| (0..self.artifacts.len()).map(move |a| (t, a)))
            .collect();
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.config.workers.clamp(1, tasks.len());
        tracing::debug!(tasks = tasks.len(), workers, "Generating artifacts");

        let next = AtomicUsize::new(0);
        let cancelled = AtomicBool::new(false);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let outputs: Mutex<Vec<(usize, GeneratedFile)>> = Mutex::new(Vec::with_capacity(tasks.len()));

        thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let (tasks, next, cancelled) = (&tasks, &next, &cancelled);
                    let (first_error, outputs) = (&first_error, &outputs);
                    s.spawn(move || {
                        loop {
                            if cancelled.load(Ordering::Acquire) {
                                break;
                            }
                            let idx = next.fetch_add(1, Ordering::Relaxed);
                            let Some(&(t, a)) = tasks.get(idx) else {
                                break;
                            };
                            match self.artifacts[a].render(self.graph, &types[t]) {
                                Ok(file) => {
                                    outputs
                                        .lock()
                                        .unwrap_or_else(PoisonError::into_inner)
                                        .push((idx, file));
                                    self.metrics.completed.fetch_add(1, Ordering::AcqRel);
                                }
                                Err(e) => {
                                    cancelled.store(true, Ordering::Release);
                                    let mut slot =
                                        first_error.lock().unwrap_or_else(PoisonError::into_inner);
                                    if slot.is_none() {
                                        *slot = Some(e);
                                    }
                                    break;
                                }
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                if let Err(panic) = handle.join() {
                    std::panic::resume_unwind(panic);
                }
            }
        });

        if let Some(err) = first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(err);
        }
        let mut outputs = outputs.into_inner().unwrap_or_else(PoisonError::into_inner);
        outputs.sort_by_key(|(idx, _)| *idx);
        Ok(outputs.into_iter().map(|(_, file)| file).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::field::Field;
    use crate::graph::SchemaBuilder;
    use entgraph_core::ConfigErrorKind;

    fn graph() -> Graph {
        SchemaBuilder::new()
            .entity(
                EntityType::new("User")
                    .field(Field::string("name"))
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
            .unwrap()
    }

    struct Failing;

    impl Artifact for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn render(&self, _graph: &Graph, ty: &EntityType) -> Result<GeneratedFile> {
            if ty.name == "Post" {
                return Err(Error::config(ConfigErrorKind::Pipeline, "cannot render Post"));
            }
            Ok(GeneratedFile {
                path: ty.name.clone(),
                contents: String::new(),
            })
        }
    }

    #[test]
    fn test_generate_every_type_and_artifact() {
        let graph = graph();
        let generator = Generator::new(&graph)
            .config(GeneratorConfig::default().workers(4))
            .artifact(DdlArtifact {
                dialect: Dialect::Sqlite,
            })
            .artifact(ManifestArtifact);
        let files = generator.generate().unwrap();
        assert_eq!(files.len(), 6);
        assert_eq!(generator.metrics().completed(), 6);
        assert_eq!(files[0].path, "entgraph/user.sqlite.sql");
        assert!(files[0].contents.contains("\"user_groups\""));
        assert_eq!(files[1].path, "entgraph/user.json");
        let manifest: serde_json::Value = serde_json::from_str(&files[3].contents).unwrap();
        assert_eq!(manifest["type"], "Post");
        assert_eq!(manifest["edges"][0]["relation"]["kind"], "ManyToOne");
        assert_eq!(manifest["foreign_keys"][0]["column"], "user_id");
    }

    #[test]
    fn test_ddl_artifact_renders_owned_join_tables() {
        // Tag is declared before the type owning its join table.
        let graph = SchemaBuilder::new()
            .entity(EntityType::new("Tag").edge(Edge::from("docs", "Doc").reference("tags")))
            .entity(EntityType::new("Doc").edge(Edge::to("tags", "Tag")))
            .entity(EntityType::new("User").edge(Edge::to("groups", "Group")))
            .entity(EntityType::new("Group").edge(Edge::from("users", "User").reference("groups")))
            .build()
            .unwrap();
        let artifact = DdlArtifact {
            dialect: Dialect::Postgres,
        };
        let render = |name: &str| artifact.render(&graph, graph.entity(name).unwrap()).unwrap();
        let join_ddl = |owner: &str, edge: &str| {
            let table = &graph.relation(owner, edge).unwrap().table;
            let jt = graph
                .join_tables()
                .into_iter()
                .find(|jt| &jt.table == table)
                .unwrap();
            ddl::create_join_table(&jt, Dialect::Postgres)
        };

        let doc = render("Doc");
        assert_eq!(doc.contents.matches("CREATE TABLE").count(), 2);
        assert!(doc.contents.contains(&join_ddl("Doc", "tags")));
        let user = render("User");
        assert_eq!(user.contents.matches("CREATE TABLE").count(), 2);
        assert!(user.contents.contains(&join_ddl("User", "groups")));
        assert_eq!(render("Tag").contents.matches("CREATE TABLE").count(), 1);
        assert_eq!(render("Group").contents.matches("CREATE TABLE").count(), 1);
    }

    #[test]
    fn test_first_error_cancels() {
        let graph = graph();
        let generator = Generator::new(&graph)
            .config(GeneratorConfig::default().workers(1))
            .artifact(Failing);
        let err = generator.generate().unwrap_err();
        assert!(err.to_string().contains("cannot render Post"));
        // With one worker, Group is never claimed after Post fails.
        assert_eq!(generator.metrics().completed(), 1);
    }
}
