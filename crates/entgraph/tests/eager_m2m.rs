//! Many-to-many edges through a join table.

mod fixtures;

use entgraph::prelude::*;
use fixtures::{blog_client, create_post, unwrap_outcome};

struct Seeded {
    client: Client,
    driver: Arc<MemoryDriver>,
    admins: Value,
    editors: Value,
    ann: Value,
}

/// ann is in both groups, bob only in admins, cat in none.
fn seed(cx: &Cx) -> Seeded {
    let (client, driver) = blog_client(Registry::new());
    let group = |name: &str| {
        let node = unwrap_outcome(client.create("Group").set("name", name).save(cx));
        node.id.expect("group id")
    };
    let admins = group("admins");
    let editors = group("editors");

    let ann = unwrap_outcome(
        client
            .create("User")
            .set("name", "ann")
            .add_edge_ids("groups", [admins.clone(), editors.clone()])
            .save(cx),
    );
    unwrap_outcome(
        client
            .create("User")
            .set("name", "bob")
            .add_edge_ids("groups", [admins.clone()])
            .exec(cx),
    );
    unwrap_outcome(client.create("User").set("name", "cat").exec(cx));
    Seeded {
        client,
        driver,
        admins,
        editors,
        ann: ann.id.expect("user id"),
    }
}

fn group_names(user: &Entity) -> Vec<String> {
    let mut names: Vec<String> = user
        .edge("groups")
        .unwrap()
        .iter()
        .filter_map(|g| g.get("name").and_then(Value::as_str).map(str::to_string))
        .collect();
    names.sort();
    names
}

#[test]
fn eager_loading_through_a_join_table_takes_three_queries() {
    let cx = Cx::for_testing();
    let s = seed(&cx);
    s.driver.reset_stats();

    let users = unwrap_outcome(
        s.client
            .query("User")
            .order(OrderBy::asc("name"))
            .with_edge("groups")
            .all(&cx),
    );
    assert_eq!(s.driver.stats().round_trips(), 3);
    let loaded: Vec<Vec<String>> = users.iter().map(group_names).collect();
    assert_eq!(
        loaded,
        vec![
            vec!["admins".to_string(), "editors".to_string()],
            vec!["admins".to_string()],
            vec![],
        ]
    );
}

#[test]
fn the_inverse_edge_reads_the_same_rows() {
    let cx = Cx::for_testing();
    let s = seed(&cx);

    let admins = unwrap_outcome(
        s.client
            .query("Group")
            .where_(Predicate::eq("id", s.admins.clone()))
            .with_edge_configured("users", |q| q.order(OrderBy::desc("name")))
            .only(&cx),
    );
    let names: Vec<&Value> = admins
        .edge("users")
        .unwrap()
        .iter()
        .filter_map(|u| u.get("name"))
        .collect();
    assert_eq!(names, vec![&Value::from("bob"), &Value::from("ann")]);
}

#[test]
fn edge_predicates_filter_by_membership() {
    let cx = Cx::for_testing();
    let s = seed(&cx);
    let step = s.client.graph().step("User", "groups").unwrap();

    let members = unwrap_outcome(
        s.client
            .query("User")
            .where_(Predicate::has_neighbors(step.clone()))
            .count(&cx),
    );
    assert_eq!(members, 2);

    let editors = unwrap_outcome(
        s.client
            .query("User")
            .where_(Predicate::has_neighbors_with(
                step,
                Predicate::eq("name", "editors"),
            ))
            .ids(&cx),
    );
    assert_eq!(editors, vec![s.ann.clone()]);

    let via_group = unwrap_outcome(
        s.client
            .query("Group")
            .where_(Predicate::eq("id", s.editors.clone()))
            .query_edge("users")
            .unwrap()
            .ids(&cx),
    );
    assert_eq!(via_group, vec![s.ann.clone()]);
}

#[test]
fn removing_and_clearing_edges_updates_both_sides() {
    let cx = Cx::for_testing();
    let s = seed(&cx);

    unwrap_outcome(
        s.client
            .update_one("User", s.ann.clone())
            .remove_edge_ids("groups", [s.admins.clone()])
            .exec(&cx),
    );
    let admins = unwrap_outcome(
        s.client
            .query("Group")
            .where_(Predicate::eq("id", s.admins.clone()))
            .with_edge("users")
            .only(&cx),
    );
    assert_eq!(admins.edge("users").unwrap().len(), 1);

    unwrap_outcome(
        s.client
            .update_one("Group", s.editors.clone())
            .clear_edge("users")
            .exec(&cx),
    );
    let ann = unwrap_outcome(
        s.client
            .query("User")
            .where_(Predicate::eq("id", s.ann.clone()))
            .with_edge("groups")
            .only(&cx),
    );
    assert!(ann.edge("groups").unwrap().is_empty());
}

#[test]
fn a_foreign_key_edge_and_a_join_table_edge_load_together() {
    let cx = Cx::for_testing();
    let (client, driver) = blog_client(Registry::new());
    for i in 0..5 {
        let group = unwrap_outcome(
            client
                .create("Group")
                .set("name", format!("group{i}"))
                .save(&cx),
        );
        let user = unwrap_outcome(
            client
                .create("User")
                .set("name", format!("user{i}"))
                .add_edge_ids("groups", [group.id.expect("group id")])
                .save(&cx),
        );
        create_post(&client, &cx, &format!("post{i}"), &user.id.expect("user id"));
    }
    driver.reset_stats();

    let users = unwrap_outcome(
        client
            .query("User")
            .order(OrderBy::asc("name"))
            .with_edge("posts")
            .with_edge("groups")
            .all(&cx),
    );
    assert_eq!(users.len(), 5);
    // users, posts, join rows, groups
    assert_eq!(driver.stats().round_trips(), 4);
    for (i, user) in users.iter().enumerate() {
        let posts: Vec<&Value> = user
            .edge("posts")
            .expect("posts loaded")
            .iter()
            .filter_map(|p| p.get("title"))
            .collect();
        assert_eq!(posts, vec![&Value::from(format!("post{i}"))], "user{i}");
        assert_eq!(group_names(user), vec![format!("group{i}")], "user{i}");
    }
}
