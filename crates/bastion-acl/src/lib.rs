//! # bastion-acl: Permission resolution for `Bastion`
//!
//! Decides, per request, which access-control permission applies and what
//! data-level restrictions it imposes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │  RecordSource                │     │  PredicateCompiler           │
//! │  (static entries, documents) │     │  (expression syntax)         │
//! └──────────────┬───────────────┘     └──────────────┬───────────────┘
//!                │ RawRecord                          │ Arc<dyn Predicate>
//!                ▼                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  PermissionStore                                                    │
//! │  RwLock<Arc<PermissionSet>>, atomic reload                          │
//! └──────────────────────────────┬──────────────────────────────────────┘
//!                                │ snapshot()
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Resolver                                                           │
//! │  ├─ filter by roles                                                 │
//! │  ├─ evaluate predicates                                             │
//! │  ├─ pick lowest priority, earliest loaded on ties                   │
//! │  └─ interpolate the data restriction                                │
//! └──────────────────────────────┬──────────────────────────────────────┘
//!                                ▼
//!                            Decision
//! ```
//!
//! ## Examples
//!
//! ```
//! use bastion_acl::{PermissionStore, RecordSource, Resolver, StaticSource};
//! use bastion_types::{Method, Principal, Request};
//! use serde_json::json;
//!
//! let source = StaticSource::new(vec![json!({
//!     "roles": ["user"],
//!     "predicate": "method=GET and path-prefix('/shop')",
//!     "priority": 10,
//!     "mongo": {"readFilter": {"owner": "%USER"}},
//! })]);
//! let store = PermissionStore::open(vec![Box::new(source) as Box<dyn RecordSource>]).unwrap();
//!
//! let request = Request::new(Method::Get, "/shop/orders")
//!     .with_principal(Principal::new("alice").with_role("user"));
//! let decision = Resolver::new().resolve(&store.snapshot(), &request);
//!
//! assert!(decision.is_allowed());
//! assert_eq!(
//!     decision.restriction().unwrap().read_filter,
//!     Some(json!({"owner": "alice"}))
//! );
//! ```

mod error;
pub mod interpolate;
pub mod predicate;
mod record;
pub mod resolver;
pub mod restriction;
pub mod source;
pub mod store;


pub use error::{AclError, Result};
pub use interpolate::interpolate;
pub use predicate::{ExpressionCompiler, Predicate, PredicateCompiler};
pub use record::{PermissionRecord, RESTRICTION_KEY, RawRecord, RecordOrigin};
pub use resolver::{Decision, Resolver, UNAUTHENTICATED_ROLE};
pub use restriction::{DataRestriction, EffectiveRestriction, is_management_request};
pub use source::{
    CollectionSource, CollectionTarget, DocumentCollection, InMemoryCollection, RecordSource,
    StaticSource,
};
pub use store::{PermissionSet, PermissionStore, load_all};
