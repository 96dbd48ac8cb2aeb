//! Registry and execution of interceptors.
//!
//! Interceptors are grouped by intercept point and ordered by priority
//! (lower first), ties keeping registration order. The registry is frozen
//! once built; [`Pipeline::run`] takes `&self` and can serve any number of
//! requests concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use bastion_types::{Request, Response};
use tracing::{debug, error, instrument};

use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result};
use crate::interceptor::Interceptor;
use crate::point::InterceptPoint;

/// Status code of the response produced when an interceptor faults.
pub const INTERNAL_FAULT_STATUS: u16 = 500;
pub const INTERNAL_FAULT_MESSAGE: &str = "Internal Server Error";

// ============================================================================
// Outcome
// ============================================================================

/// Why a point stopped dispatching before its last interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The response is in error. `interceptor` set it, or `None` if it was
    /// already in error when the point started.
    InError { interceptor: Option<String> },
    /// An interceptor returned an error or panicked.
    InternalFault { interceptor: String, message: String },
    /// The request was cancelled.
    Cancelled,
}

/// Result of running one intercept point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub point: InterceptPoint,
    /// Interceptors whose `handle` ran.
    pub ran: usize,
    /// Interceptors that did not resolve.
    pub skipped: usize,
    /// Set when the traversal must stop.
    pub termination: Option<Termination>,
}

impl Outcome {
    fn new(point: InterceptPoint) -> Self {
        Self {
            point,
            ran: 0,
            skipped: 0,
            termination: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects interceptors at startup and freezes them into a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
    disabled: BTreeSet<String>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interceptor.
    #[must_use]
    pub fn register(self, interceptor: impl Interceptor + 'static) -> Self {
        self.register_shared(Arc::new(interceptor))
    }

    /// Registers an already shared interceptor.
    #[must_use]
    pub fn register_shared(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Registers several shared interceptors, in order.
    #[must_use]
    pub fn register_all(mut self, interceptors: impl IntoIterator<Item = Arc<dyn Interceptor>>) -> Self {
        self.interceptors.extend(interceptors);
        self
    }

    /// Leaves out interceptors with these names.
    #[must_use]
    pub fn disable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled.extend(names.into_iter().map(Into::into));
        self
    }

    /// Freezes the registry.
    ///
    /// Fails if two enabled interceptors share a name.
    pub fn build(self) -> Result<Pipeline> {
        let mut seen = BTreeSet::new();
        let mut chains: BTreeMap<InterceptPoint, Vec<Arc<dyn Interceptor>>> = BTreeMap::new();

        for interceptor in self.interceptors {
            let name = interceptor.name().to_string();
            if self.disabled.contains(&name) {
                debug!(interceptor = %name, "Interceptor disabled");
                continue;
            }
            if !seen.insert(name.clone()) {
                return Err(PipelineError::DuplicateInterceptor { name });
            }
            chains
                .entry(interceptor.intercept_point())
                .or_default()
                .push(interceptor);
        }

        for chain in chains.values_mut() {
            // Stable: equal priorities keep registration order.
            chain.sort_by_key(|i| i.priority());
        }

        Ok(Pipeline { chains })
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// A frozen set of interceptors grouped by intercept point.
#[derive(Default)]
pub struct Pipeline {
    chains: BTreeMap<InterceptPoint, Vec<Arc<dyn Interceptor>>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (point, chain) in &self.chains {
            map.entry(point, &chain.iter().map(|i| i.name()).collect::<Vec<_>>());
        }
        map.finish()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Names of the interceptors at `point`, in execution order.
    pub fn names(&self, point: InterceptPoint) -> Vec<&str> {
        self.chains
            .get(&point)
            .map(|chain| chain.iter().map(|i| i.name()).collect())
            .unwrap_or_default()
    }

    /// Total number of registered interceptors.
    pub fn len(&self) -> usize {
        self.chains.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the interceptors of `point`.
    pub fn run(&self, point: InterceptPoint, request: &mut Request, response: &mut Response) -> Outcome {
        self.run_with(point, request, response, &CancellationToken::new())
    }

    /// Runs the interceptors of `point`, stopping if `cancel` is triggered.
    #[instrument(skip_all, fields(point = %point, path = %request.path()))]
    pub fn run_with(
        &self,
        point: InterceptPoint,
        request: &mut Request,
        response: &mut Response,
        cancel: &CancellationToken,
    ) -> Outcome {
        let mut outcome = Outcome::new(point);

        if response.is_in_error() {
            outcome.termination = Some(Termination::InError { interceptor: None });
            return outcome;
        }
        if cancel.is_cancelled() {
            outcome.termination = Some(Termination::Cancelled);
            return outcome;
        }

        for interceptor in self.chains.get(&point).into_iter().flatten() {
            if cancel.is_cancelled() {
                debug!("Request cancelled; stopping dispatch");
                outcome.termination = Some(Termination::Cancelled);
                break;
            }

            let dispatched = match guarded(|| interceptor.resolve(request)) {
                Ok(false) => {
                    outcome.skipped += 1;
                    continue;
                }
                Ok(true) => {
                    debug!(interceptor = %interceptor.name(), "Dispatching interceptor");
                    outcome.ran += 1;
                    dispatch(interceptor.as_ref(), request, response)
                }
                Err(message) => Err(format!("resolve: {message}")),
            };

            if let Err(message) = dispatched {
                error!(
                    interceptor = %interceptor.name(),
                    error = %message,
                    "Interceptor failed; terminating request"
                );
                response.set_error(INTERNAL_FAULT_STATUS, INTERNAL_FAULT_MESSAGE);
                outcome.termination = Some(Termination::InternalFault {
                    interceptor: interceptor.name().to_string(),
                    message,
                });
                break;
            }

            if response.is_in_error() {
                debug!(
                    interceptor = %interceptor.name(),
                    status = response.status(),
                    "Response in error; terminating request"
                );
                outcome.termination = Some(Termination::InError {
                    interceptor: Some(interceptor.name().to_string()),
                });
                break;
            }
        }

        outcome
    }
}

/// Runs `f`, turning a panic into a message.
fn guarded<T>(f: impl FnOnce() -> T) -> std::result::Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| panic_message(panic.as_ref()))
}

/// Calls `handle`, turning errors and panics into a message.
fn dispatch(
    interceptor: &dyn Interceptor,
    request: &mut Request,
    response: &mut Response,
) -> std::result::Result<(), String> {
    guarded(|| interceptor.handle(request, response))?.map_err(|e| e.to_string())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic".to_string()
    }
}
