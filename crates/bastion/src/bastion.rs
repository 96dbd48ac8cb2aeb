//! The assembled request guard.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use bastion_acl::{
    CollectionSource, CollectionTarget, Decision, DocumentCollection, ExpressionCompiler,
    PermissionStore, PredicateCompiler, RecordSource, Resolver, StaticSource,
};
use bastion_config::{BastionConfig, CollectionConfig};
use bastion_pipeline::{
    CancellationToken, INTERNAL_FAULT_MESSAGE, INTERNAL_FAULT_STATUS, InterceptPoint, Interceptor,
    Pipeline, Traversal, acl_interceptors,
};
use bastion_types::{Request, Response};
use tracing::{debug, error, info, warn};

use crate::error::{BastionError, Result};

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Bastion`] from configuration and injected backends.
pub struct BastionBuilder {
    config: BastionConfig,
    collection: Option<Arc<dyn DocumentCollection>>,
    compiler: Arc<dyn PredicateCompiler>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl BastionBuilder {
    fn new(config: BastionConfig) -> Self {
        Self {
            config,
            collection: None,
            compiler: Arc::new(ExpressionCompiler),
            interceptors: Vec::new(),
        }
    }

    /// Backs the permission collection. Without `[acl.collection]` in the
    /// configuration, documents are read from `restheart.acl`.
    #[must_use]
    pub fn with_collection(mut self, collection: Arc<dyn DocumentCollection>) -> Self {
        self.collection = Some(collection);
        self
    }

    /// Compiles predicates with `compiler` instead of the expression syntax.
    #[must_use]
    pub fn with_compiler(mut self, compiler: Arc<dyn PredicateCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Registers an interceptor next to the built-in ones.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    fn sources(&self) -> Result<Vec<Box<dyn RecordSource>>> {
        let mut sources: Vec<Box<dyn RecordSource>> =
            vec![Box::new(StaticSource::new(self.config.acl.permissions.clone()))];

        let target = self
            .config
            .acl
            .collection
            .as_ref()
            .map(|CollectionConfig { db, collection }| CollectionTarget::new(db, collection));

        match (&self.collection, target) {
            (Some(collection), target) => sources.push(Box::new(CollectionSource::new(
                Arc::clone(collection),
                target.unwrap_or_default(),
            ))),
            (None, Some(target)) => return Err(BastionError::MissingCollection { target }),
            (None, None) => {}
        }
        Ok(sources)
    }

    /// Loads the permissions and freezes the pipeline.
    ///
    /// Fails if any permission is invalid or two interceptors share a name.
    pub fn build(self) -> Result<Bastion> {
        let store = Arc::new(PermissionStore::open_with(
            self.sources()?,
            Arc::clone(&self.compiler),
        )?);

        let mut resolver =
            Resolver::new().with_anonymous_roles(self.config.acl.anonymous_roles.iter().cloned());
        if !self.config.acl.audit {
            resolver = resolver.without_audit();
        }

        let interceptors: Vec<Arc<dyn Interceptor>> =
            acl_interceptors(Arc::clone(&store), resolver.clone())
                .into_iter()
                .chain(self.interceptors)
                .collect();
        for name in &self.config.pipeline.disabled {
            if !interceptors.iter().any(|i| i.name() == name) {
                warn!(interceptor = %name, "Cannot disable unknown interceptor");
            }
        }

        let pipeline = Pipeline::builder()
            .register_all(interceptors)
            .disable(self.config.pipeline.disabled.iter().cloned())
            .build()?;

        info!(
            permissions = store.snapshot().len(),
            interceptors = pipeline.len(),
            disabled = ?self.config.pipeline.disabled,
            "Bastion ready"
        );

        Ok(Bastion {
            store,
            resolver,
            pipeline,
        })
    }
}

// ============================================================================
// Bastion
// ============================================================================

/// Resolves permissions for requests and drives them through the
/// interceptor pipeline around a handler.
///
/// Cheap to share: every method takes `&self`.
pub struct Bastion {
    store: Arc<PermissionStore>,
    resolver: Resolver,
    pipeline: Pipeline,
}

impl std::fmt::Debug for Bastion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bastion")
            .field("store", &self.store)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl Bastion {
    pub fn builder(config: BastionConfig) -> BastionBuilder {
        BastionBuilder::new(config)
    }

    /// Assembles a guard from configuration alone.
    pub fn open(config: BastionConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Loads configuration from `project_dir` and assembles a guard.
    pub fn open_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(BastionConfig::load_from_dir(project_dir)?)
    }

    pub fn store(&self) -> &Arc<PermissionStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Resolves `request` against the active permissions without running
    /// any interceptor.
    pub fn decide(&self, request: &Request) -> Decision {
        self.resolver.resolve(&self.store.snapshot(), request)
    }

    /// Reloads every permission source. On failure the active permissions
    /// stay in force.
    ///
    /// Returns the generation of the new permission set.
    pub fn reload(&self) -> Result<u64> {
        Ok(self.store.reload()?.generation())
    }

    /// Runs `request` through every intercept point around `handler`.
    ///
    /// The handler only runs if no interceptor put the response in error
    /// before it. A panicking handler yields a 500 response.
    pub fn process<H>(&self, request: &mut Request, handler: H) -> Result<Response>
    where
        H: FnOnce(&mut Request, &mut Response),
    {
        self.process_with(request, handler, &CancellationToken::new())
    }

    /// Like [`process`](Self::process), stopping once `cancel` is triggered.
    pub fn process_with<H>(
        &self,
        request: &mut Request,
        handler: H,
        cancel: &CancellationToken,
    ) -> Result<Response>
    where
        H: FnOnce(&mut Request, &mut Response),
    {
        let mut response = Response::new();
        let mut traversal = Traversal::new(&self.pipeline).with_cancellation(cancel.clone());

        traversal.run_through(InterceptPoint::BeforeHandler, request, &mut response)?;
        if traversal.is_finished() {
            debug!(
                path = %request.path(),
                status = response.status(),
                state = ?traversal.state(),
                "Request stopped before handler"
            );
            return Ok(response);
        }

        if catch_unwind(AssertUnwindSafe(|| handler(request, &mut response))).is_err() {
            error!(path = %request.path(), "Handler panicked");
            response.set_error(INTERNAL_FAULT_STATUS, INTERNAL_FAULT_MESSAGE);
            return Ok(response);
        }

        traversal.run_through(InterceptPoint::Response, request, &mut response)?;
        if traversal.is_terminated() && !response.is_in_error() {
            warn!(path = %request.path(), state = ?traversal.state(), "Request cancelled after handler");
        }

        debug!(
            path = %request.path(),
            status = response.status(),
            ran = traversal.ran(),
            skipped = traversal.skipped(),
            "Request processed"
        );
        Ok(response)
    }
}
