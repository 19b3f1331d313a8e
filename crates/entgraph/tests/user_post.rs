//! The users-and-posts walkthrough: create, validate, eager-load, traverse.

mod fixtures;

use entgraph::prelude::*;
use fixtures::{blog_client, create_post, create_user, expect_err, unwrap_outcome};

#[test]
fn create_assigns_an_id_and_applies_defaults() {
    let cx = Cx::for_testing();
    let (client, driver) = blog_client(Registry::new());

    let ann = create_user(&client, &cx, "ann");
    assert!(ann.id_i64().is_some_and(|id| id > 0));
    assert_eq!(ann.get("role"), Some(&Value::from("member")));
    assert_eq!(ann.get("name"), Some(&Value::from("ann")));
    assert_eq!(driver.stats().creates, 1);

    let gid = ann.global_id().expect("integer id");
    assert_eq!(gid.type_name, "User");
}

#[test]
fn missing_required_field_fails_before_the_driver() {
    let cx = Cx::for_testing();
    let (client, driver) = blog_client(Registry::new());

    let err = expect_err(client.create("User").set("age", 30_i64).save(&cx));
    match &err {
        Error::Validation(e) => assert_eq!(e.name, "name"),
        other => panic!("expected a validation error, got {other}"),
    }

    let err = expect_err(client.create("User").set("name", "").save(&cx));
    assert!(entgraph::base::is_validation_error(&err));
    assert_eq!(driver.stats().round_trips(), 0);
}

#[test]
fn eager_loading_posts_for_fifty_users_takes_two_round_trips() {
    let cx = Cx::for_testing();
    let (client, driver) = blog_client(Registry::new());
    for i in 0..50 {
        let user = create_user(&client, &cx, &format!("user{i}"));
        let id = user.id.expect("id");
        create_post(&client, &cx, &format!("post{i}"), &id);
        if i % 10 == 0 {
            create_post(&client, &cx, &format!("extra{i}"), &id);
        }
    }
    driver.reset_stats();

    let users = unwrap_outcome(client.query("User").with_edge("posts").all(&cx));
    assert_eq!(users.len(), 50);
    assert_eq!(driver.stats().round_trips(), 2);

    for (i, user) in users.iter().enumerate() {
        let posts = user.edge("posts").expect("posts loaded");
        let expected = if i % 10 == 0 { 2 } else { 1 };
        assert_eq!(posts.len(), expected, "user{i}");
        assert_eq!(posts[0].get("title"), Some(&Value::from(format!("post{i}"))));
    }
}

#[test]
fn eager_loading_the_owning_side() {
    let cx = Cx::for_testing();
    let (client, driver) = blog_client(Registry::new());
    let ann = create_user(&client, &cx, "ann");
    let bob = create_user(&client, &cx, "bob");
    create_post(&client, &cx, "a1", ann.id.as_ref().expect("id"));
    create_post(&client, &cx, "a2", ann.id.as_ref().expect("id"));
    create_post(&client, &cx, "b1", bob.id.as_ref().expect("id"));
    unwrap_outcome(client.create("Post").set("title", "orphan").save(&cx));
    driver.reset_stats();

    let posts = unwrap_outcome(
        client
            .query("Post")
            .order(OrderBy::asc("title"))
            .with_edge("author")
            .all(&cx),
    );
    assert_eq!(driver.stats().round_trips(), 2);
    let authors: Vec<Option<&Value>> = posts
        .iter()
        .map(|p| p.edge_one("author").ok().and_then(|a| a.get("name")))
        .collect();
    assert_eq!(
        authors,
        vec![
            Some(&Value::from("ann")),
            Some(&Value::from("ann")),
            Some(&Value::from("bob")),
            None,
        ]
    );
    let orphan = &posts[3];
    assert!(entgraph::base::is_not_found(&orphan.edge_one("author").unwrap_err()));
}

#[test]
fn edges_not_requested_are_not_loaded() {
    let cx = Cx::for_testing();
    let (client, _) = blog_client(Registry::new());
    create_user(&client, &cx, "ann");
    let ann = unwrap_outcome(client.query("User").only(&cx));
    assert!(entgraph::base::is_not_loaded(&ann.edge("posts").unwrap_err()));
}

#[test]
fn traversal_from_users_to_their_posts() {
    let cx = Cx::for_testing();
    let (client, _) = blog_client(Registry::new());
    let ann = create_user(&client, &cx, "ann");
    let bob = create_user(&client, &cx, "bob");
    create_post(&client, &cx, "mine", ann.id.as_ref().expect("id"));
    create_post(&client, &cx, "theirs", bob.id.as_ref().expect("id"));

    let posts = client
        .query("User")
        .where_(Predicate::eq("name", "ann"))
        .query_edge("posts")
        .expect("edge exists");
    let titles: Vec<_> = unwrap_outcome(posts.all(&cx))
        .into_iter()
        .filter_map(|p| p.get("title").cloned())
        .collect();
    assert_eq!(titles, vec![Value::from("mine")]);

    let with_posts = client.query("User").where_(Predicate::has_neighbors(
        client.graph().step("User", "posts").expect("step"),
    ));
    assert_eq!(unwrap_outcome(with_posts.count(&cx)), 2);
}

#[test]
fn update_and_delete_by_id() {
    let cx = Cx::for_testing();
    let (client, _) = blog_client(Registry::new());
    let ann = create_user(&client, &cx, "ann");
    let ann_id = ann.id.clone().expect("id");
    let post = create_post(&client, &cx, "hello", &ann_id);
    let post_id = post.id.clone().expect("id");

    let updated = unwrap_outcome(
        client
            .update_one("Post", post_id.clone())
            .add("views", 3_i64)
            .set("title", "hello again")
            .save(&cx),
    );
    assert_eq!(updated.get("views"), Some(&Value::Int(3)));
    assert_eq!(updated.get("title"), Some(&Value::from("hello again")));

    let n = unwrap_outcome(
        client
            .update("Post")
            .where_(Predicate::eq("title", "nothing like this"))
            .set("title", "x")
            .save(&cx),
    );
    assert_eq!(n, 0);

    unwrap_outcome(client.delete_one("User", ann_id.clone()).exec(&cx));
    let err = expect_err(client.delete_one("User", ann_id).exec(&cx));
    assert!(entgraph::base::is_not_found(&err));

    let post = unwrap_outcome(client.query("Post").with_edge("author").only(&cx));
    assert!(post.edge("author").expect("loaded").is_empty());
}

#[test]
fn a_no_op_update_returns_the_node_unchanged() {
    let cx = Cx::for_testing();
    let (client, _) = blog_client(Registry::new());
    let ann = create_user(&client, &cx, "ann");
    let again = unwrap_outcome(
        client
            .update_one("User", ann.id.clone().expect("id"))
            .save(&cx),
    );
    assert_eq!(again, ann);
    assert_eq!(unwrap_outcome(client.query("User").only(&cx)), ann);
}

#[test]
fn saving_an_untouched_builder_stores_the_defaults() {
    let cx = Cx::for_testing();
    let graph = SchemaBuilder::new()
        .entity(
            EntityType::new("Setting")
                .field(Field::string("theme").default("light"))
                .field(Field::bool("beta").default(false))
                .field(Field::string("note").optional().nillable()),
        )
        .build()
        .expect("schema");
    let driver = Arc::new(MemoryDriver::new(&graph));
    let client = Client::open(graph, driver).expect("client");

    let saved = unwrap_outcome(client.create("Setting").save(&cx));
    assert_eq!(saved.get("theme"), Some(&Value::from("light")));
    assert_eq!(saved.get("beta"), Some(&Value::from(false)));
    assert_eq!(saved.get("note"), Some(&Value::Null));
    assert_eq!(unwrap_outcome(client.query("Setting").only(&cx)), saved);
}
