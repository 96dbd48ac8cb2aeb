//! The read-mostly request snapshot handed over by the transport layer.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::{Method, Principal, ResourceType};

// ============================================================================
// Headers
// ============================================================================

/// Request headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any previous value.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ============================================================================
// Attachments
// ============================================================================

/// Returned when a value of the same type is already attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyAttached;

impl fmt::Display for AlreadyAttached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a value of this type is already attached to the request")
    }
}

impl std::error::Error for AlreadyAttached {}

/// Typed, write-once values attached to a request while it is processed.
///
/// Each type can be attached at most once; attached values are read-only for
/// the rest of the request.
#[derive(Clone, Default)]
pub struct Attachments {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Attachments {
    /// Attaches `value`. Fails if a value of type `T` is already present.
    pub fn attach<T: Any + Send + Sync>(&mut self, value: T) -> Result<(), AlreadyAttached> {
        let key = TypeId::of::<T>();
        if self.values.contains_key(&key) {
            return Err(AlreadyAttached);
        }
        self.values.insert(key, Arc::new(value));
        Ok(())
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Attachments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachments")
            .field("len", &self.values.len())
            .finish()
    }
}

// ============================================================================
// Request
// ============================================================================

/// Normalized view of an incoming request.
///
/// Predicates only read from it. Interceptors may rewrite the body and
/// attach values, but never change the identity fields (method, path,
/// principal) once the transport has built the request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    resource_type: ResourceType,
    headers: Headers,
    query: BTreeMap<String, Vec<String>>,
    principal: Option<Principal>,
    service: Option<String>,
    body: Option<Value>,
    attachments: Attachments,
}

impl Request {
    /// Creates a request, classifying `path` with [`ResourceType::classify`].
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let resource_type = ResourceType::classify(&path);
        Self {
            method,
            path,
            resource_type,
            headers: Headers::new(),
            query: BTreeMap::new(),
            principal: None,
            service: None,
            body: None,
            attachments: Attachments::default(),
        }
    }

    /// Overrides the resource classification.
    #[must_use]
    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a query parameter value. Repeated names accumulate.
    #[must_use]
    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(name.into()).or_default().push(value.into());
        self
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Sets the name of the service that will handle the request.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query(&self) -> &BTreeMap<String, Vec<String>> {
        &self.query
    }

    /// Returns the first value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Returns whether the request is routed to the named service.
    pub fn is_handled_by(&self, service: &str) -> bool {
        self.service.as_deref() == Some(service)
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut Value> {
        self.body.as_mut()
    }

    pub fn set_body(&mut self, body: Value) {
        self.body = Some(body);
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    /// Attaches a write-once value, see [`Attachments::attach`].
    pub fn attach<T: Any + Send + Sync>(&mut self, value: T) -> Result<(), AlreadyAttached> {
        self.attachments.attach(value)
    }

    pub fn attachment<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.attachments.get::<T>()
    }
}
