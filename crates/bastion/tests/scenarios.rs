//! End-to-end permission scenarios through the full pipeline.

use bastion::{
    Bastion, BastionConfig, Decision, InjectedFilters, Method, Principal, Request, Response,
};
use serde_json::{Value, json};
use test_case::test_case;

fn bastion(permissions: Vec<Value>) -> Bastion {
    let mut config = BastionConfig::quiet();
    config.acl.permissions = permissions;
    Bastion::open(config).expect("valid permissions")
}

fn user(id: &str, roles: &[&str]) -> Principal {
    Principal::new(id).with_roles(roles.iter().copied())
}

fn ok(_: &mut Request, _: &mut Response) {}

#[test]
fn role_and_method_grant_access() {
    let bastion = bastion(vec![json!({
        "roles": ["user"],
        "predicate": "method=GET",
        "priority": 10,
    })]);
    let mut request =
        Request::new(Method::Get, "/shop/orders").with_principal(user("alice", &["user"]));

    let response = bastion.process(&mut request, ok).unwrap();

    assert_eq!(response.status(), 200);
    let decision = Decision::of(&request).expect("decision attached");
    assert!(decision.is_allowed());
    assert_eq!(decision.matched().unwrap().priority(), 10);
}

#[test]
fn lowest_priority_record_wins() {
    let bastion = bastion(vec![
        json!({"roles": ["user"], "predicate": "method=GET", "priority": 2}),
        json!({"roles": ["user"], "predicate": "method=GET", "priority": 1}),
    ]);
    let request =
        Request::new(Method::Get, "/shop/orders").with_principal(user("alice", &["user"]));

    let decision = bastion.decide(&request);
    assert_eq!(decision.matched().unwrap().priority(), 1);
}

#[test]
fn user_placeholder_scopes_read_filter() {
    let bastion = bastion(vec![json!({
        "roles": ["user"],
        "predicate": "true",
        "priority": 1,
        "mongo": {"readFilter": {"owner": "%USER"}},
    })]);
    let mut request = Request::new(Method::Get, "/shop/orders")
        .with_principal(user("alice", &["user"]))
        .with_service("mongo");

    let mut seen = None;
    bastion
        .process(&mut request, |request, _| {
            seen = InjectedFilters::of(request).cloned();
        })
        .unwrap();

    assert_eq!(seen.and_then(|f| f.read), Some(json!({"owner": "alice"})));
}

#[test]
fn anonymous_roles_placeholder_is_empty() {
    let bastion = bastion(vec![json!({
        "roles": ["$unauthenticated"],
        "predicate": "path-prefix('/public')",
        "priority": 1,
        "mongo": {"readFilter": {"visibleTo": {"$in": "%ROLES"}}},
    })]);
    let request = Request::new(Method::Get, "/public/posts");

    let decision = bastion.decide(&request);
    assert_eq!(
        decision.restriction().unwrap().read_filter,
        Some(json!({"visibleTo": {"$in": []}}))
    );
}

#[test_case(None, 401; "anonymous")]
#[test_case(Some("alice"), 403; "authenticated")]
fn unmatched_requests_never_reach_the_handler(id: Option<&str>, status: u16) {
    let bastion = bastion(vec![json!({"roles": ["admin"], "predicate": "true", "priority": 1})]);
    let mut request = Request::new(Method::Delete, "/shop/orders/1");
    if let Some(id) = id {
        request = request.with_principal(user(id, &["user"]));
    }

    let mut handled = false;
    let response = bastion.process(&mut request, |_, _| handled = true).unwrap();

    assert!(!handled);
    assert_eq!(response.status(), status);
    assert!(response.is_in_error());
}

#[test]
fn management_requests_are_refused_before_the_handler() {
    let bastion = bastion(vec![json!({"roles": ["user"], "predicate": "true", "priority": 1})]);
    let mut request = Request::new(Method::Delete, "/shop/orders")
        .with_principal(user("alice", &["user"]))
        .with_service("mongo");

    let mut handled = false;
    let response = bastion.process(&mut request, |_, _| handled = true).unwrap();

    assert!(!handled);
    assert_eq!(response.status(), 403);
}

#[test]
fn write_bodies_are_merged_and_responses_projected() {
    let bastion = bastion(vec![json!({
        "roles": ["user"],
        "predicate": "method=POST or method=GET",
        "priority": 1,
        "mongo": {
            "mergeRequest": {"owner": "%USER"},
            "forbidReadFields": ["secret"],
        },
    })]);

    let mut post = Request::new(Method::Post, "/shop/orders")
        .with_principal(user("alice", &["user"]))
        .with_service("mongo")
        .with_body(json!({"item": "pen"}));
    let mut stored = None;
    bastion
        .process(&mut post, |request, _| stored = request.body().cloned())
        .unwrap();
    assert_eq!(stored, Some(json!({"item": "pen", "owner": "alice"})));

    let mut get = Request::new(Method::Get, "/shop/orders")
        .with_principal(user("alice", &["user"]))
        .with_service("mongo");
    let response = bastion
        .process(&mut get, |_, response| {
            response.set_content(json!([{"_id": 1, "item": "pen", "secret": "s"}]));
        })
        .unwrap();
    assert_eq!(response.content(), Some(&json!([{"_id": 1, "item": "pen"}])));
}

#[test]
fn protected_fields_cannot_be_written() {
    let bastion = bastion(vec![json!({
        "roles": ["user"],
        "predicate": "true",
        "priority": 1,
        "mongo": {"forbidWriteFields": ["owner"]},
    })]);
    let mut request = Request::new(Method::Patch, "/shop/orders/1")
        .with_principal(user("alice", &["user"]))
        .with_service("mongo")
        .with_body(json!({"$set": {"owner": "mallory"}}));

    let response = bastion.process(&mut request, ok).unwrap();
    assert_eq!(response.status(), 403);
}
