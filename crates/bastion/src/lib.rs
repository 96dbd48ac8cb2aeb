//! # Bastion
//!
//! Permission resolution and data restriction for document-store APIs.
//!
//! Bastion decides, per request, which access-control permission applies,
//! then enforces the data restrictions that permission carries: injected
//! filters, merged write fields, protected fields and projected responses.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Bastion                            │
//! │  ┌──────────┐   ┌──────────────┐   ┌──────────┐   ┌────────┐ │
//! │  │  Config  │ → │   Store      │ → │ Resolver │ → │Pipeline│ │
//! │  │ (layers) │   │(RwLock<Arc>) │   │(Decision)│   │(points)│ │
//! │  └──────────┘   └──────────────┘   └──────────┘   └────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use bastion::{Bastion, BastionConfig, Method, Principal, Request};
//! use serde_json::json;
//!
//! let mut config = BastionConfig::quiet();
//! config.acl.permissions = vec![json!({
//!     "roles": ["user"],
//!     "predicate": "method=GET",
//!     "priority": 10,
//! })];
//! let bastion = Bastion::open(config)?;
//!
//! let mut request = Request::new(Method::Get, "/shop/orders")
//!     .with_principal(Principal::new("alice").with_role("user"));
//! let response = bastion.process(&mut request, |_, response| {
//!     response.set_content(json!([{"item": "pen"}]));
//! })?;
//!
//! assert_eq!(response.status(), 200);
//! # Ok::<(), bastion::BastionError>(())
//! ```
//!
//! # Modules
//!
//! - **Composition**: [`Bastion`], [`BastionBuilder`]
//! - **Access control**: [`bastion_acl`] re-exports
//! - **Pipeline**: [`bastion_pipeline`] re-exports

mod bastion;
mod error;

pub use bastion::{Bastion, BastionBuilder};
pub use error::{BastionError, Result};

// Request and response views
pub use bastion_types::{Method, Principal, Request, ResourceType, Response};

// Access control
pub use bastion_acl::{
    AclError, CollectionTarget, DataRestriction, Decision, DocumentCollection,
    EffectiveRestriction, InMemoryCollection, PermissionRecord, PermissionSet, PermissionStore,
    Predicate, PredicateCompiler, Resolver, UNAUTHENTICATED_ROLE,
};

// Pipeline
pub use bastion_pipeline::{
    CancellationToken, Gated, InjectedFilters, InterceptPoint, Interceptor, InterceptorError,
    Outcome, Pipeline, PipelineError, Termination, Traversal, TraversalState,
};

// Configuration
pub use bastion_config::{BastionConfig, CollectionConfig, ConfigError, ConfigLoader};
