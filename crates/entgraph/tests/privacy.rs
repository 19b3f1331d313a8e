//! Read policies and query interceptors.

mod fixtures;

use std::sync::Mutex;

use entgraph::query::QueryOp;
use entgraph::prelude::*;
use fixtures::{blog_client, create_post, create_user, expect_err, unwrap_outcome};

fn deny_counts() -> QueryPolicy {
    QueryPolicy::new().rule(|_, state| {
        if state.op == QueryOp::Count {
            Decision::deny("post totals are private")
        } else {
            Decision::Skip
        }
    })
}

#[test]
fn a_denied_read_never_reaches_the_driver() {
    let cx = Cx::for_testing();
    let (client, driver) = blog_client(Registry::new().query_policy("Post", deny_counts()));
    let ann = create_user(&client, &cx, "ann");
    create_post(&client, &cx, "hello", ann.id.as_ref().expect("id"));
    driver.reset_stats();

    let err = expect_err(client.query("Post").count(&cx));
    assert!(matches!(err, Error::Privacy(_)), "{err}");
    assert_eq!(err.to_string(), "privacy denied: post totals are private");
    assert_eq!(driver.stats().round_trips(), 0);

    let posts = unwrap_outcome(client.query("Post").all(&cx));
    assert_eq!(posts.len(), 1);
}

#[test]
fn policies_apply_to_eager_loaded_edges() {
    let cx = Cx::for_testing();
    let policy = QueryPolicy::new().rule(|_, _| Decision::deny("hidden"));
    let (client, _) = blog_client(Registry::new().query_policy("Post", policy));
    let ann = create_user(&client, &cx, "ann");
    create_post(&client, &cx, "hello", ann.id.as_ref().expect("id"));

    unwrap_outcome(client.query("User").all(&cx));
    let err = expect_err(client.query("User").with_edge("posts").all(&cx));
    assert!(matches!(err, Error::Privacy(_)), "{err}");

    let gid = ann.global_id().expect("gid").to_string();
    unwrap_outcome(client.node(&cx, &gid));
}

#[test]
fn the_first_decisive_rule_wins() {
    let cx = Cx::for_testing();
    let policy = QueryPolicy::new()
        .rule(|_, _| Decision::Skip)
        .rule(|_, _| Decision::Allow)
        .rule(|_, _| Decision::deny("never reached"));
    let (client, _) = blog_client(Registry::new().query_policy("User", policy));
    create_user(&client, &cx, "ann");
    assert_eq!(unwrap_outcome(client.query("User").count(&cx)), 1);
}

#[test]
fn traversal_interceptors_narrow_every_read() {
    let cx = Cx::for_testing();
    let registry = Registry::new().intercept(
        "User",
        traverse(|_, state| {
            state.add_predicate(Predicate::ne("role", "banned"));
            Ok(())
        }),
    );
    let (client, _) = blog_client(registry);
    create_user(&client, &cx, "ann");
    unwrap_outcome(
        client
            .create("User")
            .set("name", "mallory")
            .set("role", "banned")
            .exec(&cx),
    );

    assert_eq!(unwrap_outcome(client.query("User").count(&cx)), 1);
    let names: Vec<Value> = unwrap_outcome(client.query("User").all(&cx))
        .into_iter()
        .filter_map(|u| u.get("name").cloned())
        .collect();
    assert_eq!(names, vec![Value::from("ann")]);
    let hidden = client
        .query("User")
        .where_(Predicate::eq("name", "mallory"));
    assert!(!unwrap_outcome(hidden.exist(&cx)));
}

#[test]
fn interceptors_see_every_query_including_neighbor_loads() {
    let cx = Cx::for_testing();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let log = Arc::clone(&seen);
    let registry = Registry::new().intercept_all(intercept(move |cx, state, next| {
        log.lock()
            .unwrap()
            .push(format!("{}:{}", state.type_name, state.op));
        next(cx, state)
    }));
    let (client, _) = blog_client(registry);
    let ann = create_user(&client, &cx, "ann");
    create_post(&client, &cx, "hello", ann.id.as_ref().expect("id"));
    seen.lock().unwrap().clear();

    unwrap_outcome(client.query("User").with_edge("posts").all(&cx));
    unwrap_outcome(client.query("Post").count(&cx));
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["User:all", "Post:all", "Post:count"]
    );
}
