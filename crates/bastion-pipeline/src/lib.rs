//! # bastion-pipeline: Interceptor pipeline for `Bastion`
//!
//! Runs interceptors at fixed points of the request lifecycle. Each point
//! dispatches its interceptors in ascending priority, skipping those whose
//! `resolve` declines, and stops as soon as the response is in error.
//!
//! ```text
//! BeforeAuth ─▶ AfterAuth ─▶ BeforeHandler ─▶ [handler] ─▶ AfterHandler ─▶ Response
//!                  │              │                                           │
//!              Authorize     InjectFilters                              ProjectResponse
//!              Forbid*       MergeRequest
//!                            ProtectFields
//! ```
//!
//! A [`Traversal`] tracks one request across points and refuses to run a
//! point after a later one. The [`acl`] module holds the built-in
//! interceptors enforcing permission decisions.

pub mod acl;
mod cancel;
mod error;
mod interceptor;
mod pipeline;
mod point;
mod traversal;

#[cfg(test)]
mod testing;

pub use acl::{DOCUMENT_SERVICE, InjectedFilters, acl_interceptors};
pub use cancel::CancellationToken;
pub use error::{InterceptorError, PipelineError, Result};
pub use interceptor::{Gated, Interceptor};
pub use pipeline::{INTERNAL_FAULT_MESSAGE, INTERNAL_FAULT_STATUS, Outcome, Pipeline, PipelineBuilder, Termination};
pub use point::InterceptPoint;
pub use traversal::{Traversal, TraversalState};
