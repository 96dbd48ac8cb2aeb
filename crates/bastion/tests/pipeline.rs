//! Custom interceptors, disabling built-ins and early termination.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bastion::{
    Bastion, BastionConfig, BastionError, CancellationToken, Gated, InterceptPoint, Interceptor,
    InterceptorError, Method, PipelineError, Principal, Request, Response,
};
use serde_json::json;

/// Counts the requests it sees; optionally refuses them.
struct Counter {
    name: &'static str,
    point: InterceptPoint,
    seen: Arc<AtomicUsize>,
    refuse: Option<u16>,
}

impl Counter {
    fn new(name: &'static str, point: InterceptPoint) -> (Self, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Self {
            name,
            point,
            seen: Arc::clone(&seen),
            refuse: None,
        };
        (counter, seen)
    }
}

impl Interceptor for Counter {
    fn name(&self) -> &str {
        self.name
    }

    fn intercept_point(&self) -> InterceptPoint {
        self.point
    }

    fn resolve(&self, _request: &Request) -> bool {
        true
    }

    fn handle(&self, _request: &mut Request, response: &mut Response) -> Result<(), InterceptorError> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.refuse {
            response.set_error(status, "refused");
        }
        Ok(())
    }
}

fn config() -> BastionConfig {
    let mut config = BastionConfig::quiet();
    config.acl.permissions = vec![json!({
        "roles": ["user"],
        "predicate": "true",
        "priority": 1,
        "mongo": {"forbidReadFields": ["secret"]},
    })];
    config
}

fn alice() -> Request {
    Request::new(Method::Get, "/shop/orders")
        .with_principal(Principal::new("alice").with_role("user"))
        .with_service("mongo")
}

#[test]
fn refusal_before_handler_stops_everything_after() {
    let (mut gate, _) = Counter::new("gate", InterceptPoint::BeforeHandler);
    gate.refuse = Some(429);
    let (after, after_seen) = Counter::new("after", InterceptPoint::AfterHandler);

    let bastion = Bastion::builder(config())
        .with_interceptor(gate)
        .with_interceptor(after)
        .build()
        .unwrap();

    let mut handled = false;
    let response = bastion.process(&mut alice(), |_, _| handled = true).unwrap();

    assert_eq!(response.status(), 429);
    assert!(!handled);
    assert_eq!(after_seen.load(Ordering::SeqCst), 0);
}

#[test]
fn gated_interceptor_only_sees_matching_requests() {
    let (counter, seen) = Counter::new("writes", InterceptPoint::BeforeHandler);
    let gated = Gated::with_expression(counter, "method=POST").unwrap();
    let bastion = Bastion::builder(config()).with_interceptor(gated).build().unwrap();

    bastion.process(&mut alice(), |_, _| {}).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    let mut post = Request::new(Method::Post, "/shop/orders")
        .with_principal(Principal::new("alice").with_role("user"));
    bastion.process(&mut post, |_, _| {}).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn disabled_builtins_do_not_run() {
    let mut config = config();
    config.pipeline.disabled = vec!["project-response".to_string()];
    let bastion = Bastion::open(config).unwrap();

    assert!(bastion.pipeline().names(InterceptPoint::Response).is_empty());

    let response = bastion
        .process(&mut alice(), |_, response| {
            response.set_content(json!({"_id": 1, "secret": "s"}));
        })
        .unwrap();
    assert_eq!(response.content(), Some(&json!({"_id": 1, "secret": "s"})));
}

#[test]
fn duplicate_names_are_rejected() {
    let (first, _) = Counter::new("twin", InterceptPoint::BeforeAuth);
    let (second, _) = Counter::new("twin", InterceptPoint::Response);

    let err = Bastion::builder(config())
        .with_interceptor(first)
        .with_interceptor(second)
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        BastionError::Pipeline(PipelineError::DuplicateInterceptor { .. })
    ));
}

#[test]
fn panicking_handler_yields_internal_error() {
    let bastion = Bastion::open(config()).unwrap();
    let response = bastion
        .process(&mut alice(), |_, _| panic!("handler bug"))
        .unwrap();

    assert_eq!(response.status(), 500);
    assert!(response.is_in_error());
}

#[test]
fn cancelled_request_skips_the_handler() {
    let bastion = Bastion::open(config()).unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let mut handled = false;
    let response = bastion
        .process_with(&mut alice(), |_, _| handled = true, &token)
        .unwrap();

    assert!(!handled);
    assert!(!response.is_in_error());
}
