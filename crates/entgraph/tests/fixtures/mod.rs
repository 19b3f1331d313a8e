//! Shared schema and helpers for the integration tests.

#![allow(dead_code)]

use entgraph::prelude::*;

/// Users write posts and join groups.
pub fn blog_graph() -> Graph {
    SchemaBuilder::new()
        .entity(
            EntityType::new("User")
                .field(Field::string("name").validate(Validator::NotEmpty))
                .field(Field::int("age").optional())
                .field(Field::string("role").default("member"))
                .edge(Edge::to("posts", "Post"))
                .edge(Edge::to("groups", "Group")),
        )
        .entity(
            EntityType::new("Post")
                .field(Field::string("title"))
                .field(Field::int("views").default(0_i64))
                .edge(Edge::from("author", "User").reference("posts").unique()),
        )
        .entity(
            EntityType::new("Group")
                .field(Field::string("name").unique())
                .edge(Edge::from("users", "User").reference("groups")),
        )
        .build()
        .expect("blog schema builds")
}

/// A client over a fresh in-memory driver; the driver is returned for its
/// round-trip counters.
pub fn blog_client(registry: Registry) -> (Client, Arc<MemoryDriver>) {
    let graph = blog_graph();
    let driver = Arc::new(MemoryDriver::new(&graph));
    let client = Client::new(
        graph,
        Arc::clone(&driver) as Arc<dyn Driver>,
        registry,
        ClientConfig::default(),
    )
    .expect("client");
    (client, driver)
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

pub fn create_user(client: &Client, cx: &Cx, name: &str) -> Entity {
    unwrap_outcome(client.create("User").set("name", name).save(cx))
}

pub fn create_post(client: &Client, cx: &Cx, title: &str, author: &Value) -> Entity {
    unwrap_outcome(
        client
            .create("Post")
            .set("title", title)
            .set_edge_id("author", author.clone())
            .save(cx),
    )
}
