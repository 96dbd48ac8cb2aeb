//! Predicates over request attributes.
//!
//! The resolver only depends on the [`Predicate`] trait. Textual predicates
//! are turned into predicates by a [`PredicateCompiler`]; the shipped
//! [`ExpressionCompiler`] understands the small expression language described
//! in [`parser`](self::parser).
//!
//! Compilation happens once at load time and fails loudly with
//! [`AclError::InvalidDefinition`]. Evaluation never fails.

mod expr;
mod lexer;
mod parser;

use std::fmt;
use std::sync::Arc;

use bastion_types::Request;

use crate::error::{AclError, Result};
use expr::Expr;

/// A boolean test over a request.
///
/// Implementations must be pure: no side effects and no state carried
/// between calls.
pub trait Predicate: Send + Sync + fmt::Debug {
    /// Returns whether the request satisfies the predicate.
    fn resolve(&self, request: &Request) -> bool;

    /// Source text or a short description, for logs.
    fn describe(&self) -> &str;
}

/// Turns predicate source text into an evaluable [`Predicate`].
pub trait PredicateCompiler: Send + Sync {
    fn compile(&self, source: &str) -> Result<Arc<dyn Predicate>>;
}

/// Compiler for the built-in expression syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionCompiler;

impl PredicateCompiler for ExpressionCompiler {
    fn compile(&self, source: &str) -> Result<Arc<dyn Predicate>> {
        let expr = parser::parse(source).map_err(|e| match e {
            AclError::InvalidDefinition { reason } => {
                AclError::invalid(format!("invalid predicate '{source}': {reason}"))
            }
            other => other,
        })?;
        Ok(Arc::new(CompiledExpression {
            source: source.to_string(),
            expr,
        }))
    }
}

/// Compiles `source` with the built-in [`ExpressionCompiler`].
pub fn compile(source: &str) -> Result<Arc<dyn Predicate>> {
    ExpressionCompiler.compile(source)
}

/// A predicate compiled from the built-in expression syntax.
#[derive(Debug)]
pub struct CompiledExpression {
    source: String,
    expr: Expr,
}

impl Predicate for CompiledExpression {
    fn resolve(&self, request: &Request) -> bool {
        self.expr.eval(request)
    }

    fn describe(&self) -> &str {
        &self.source
    }
}

/// A predicate backed by a closure.
pub struct FnPredicate<F> {
    description: String,
    f: F,
}

impl<F> fmt::Debug for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPredicate")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    fn resolve(&self, request: &Request) -> bool {
        (self.f)(request)
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

/// Wraps a closure as a [`Predicate`].
pub fn from_fn<F>(description: impl Into<String>, f: F) -> Arc<dyn Predicate>
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    Arc::new(FnPredicate {
        description: description.into(),
        f,
    })
}
