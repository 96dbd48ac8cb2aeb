//! Sources of raw permission records.
//!
//! Two sources ship: [`StaticSource`] for entries declared in configuration and
//! [`CollectionSource`] for documents kept in a managed collection. The
//! database client is not part of this crate; collections are read through
//! the [`DocumentCollection`] trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AclError, Result};
use crate::record::RawRecord;

/// Supplies raw records to the permission store.
pub trait RecordSource: Send + Sync {
    /// Name used in errors and logs.
    fn name(&self) -> String;

    /// Reads every record, in source order.
    fn fetch(&self) -> Result<Vec<RawRecord>>;
}

// ============================================================================
// Static entries
// ============================================================================

/// Permission entries declared in configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    entries: Vec<Value>,
}

impl StaticSource {
    pub fn new(entries: Vec<Value>) -> Self {
        Self { entries }
    }
}

impl RecordSource for StaticSource {
    fn name(&self) -> String {
        "configuration".to_string()
    }

    fn fetch(&self) -> Result<Vec<RawRecord>> {
        Ok(self.entries.iter().cloned().map(RawRecord::entry).collect())
    }
}

// ============================================================================
// Collection documents
// ============================================================================

/// Database and collection holding permission documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionTarget {
    pub db: String,
    pub collection: String,
}

impl CollectionTarget {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }
}

impl Default for CollectionTarget {
    fn default() -> Self {
        Self::new("restheart", "acl")
    }
}

impl fmt::Display for CollectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

/// Read access to a document collection.
pub trait DocumentCollection: Send + Sync {
    /// Returns every document of `target`.
    fn find_all(&self, target: &CollectionTarget) -> Result<Vec<Value>>;
}

/// A [`DocumentCollection`] held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCollection {
    documents: RwLock<HashMap<CollectionTarget, Vec<Value>>>,
}

impl InMemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a document to `target`.
    pub fn insert(&self, target: &CollectionTarget, document: Value) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| AclError::load(target.to_string(), "lock poisoned"))?
            .entry(target.clone())
            .or_default()
            .push(document);
        Ok(())
    }

    /// Replaces every document of `target`.
    pub fn replace_all(&self, target: &CollectionTarget, documents: Vec<Value>) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| AclError::load(target.to_string(), "lock poisoned"))?
            .insert(target.clone(), documents);
        Ok(())
    }
}

impl DocumentCollection for InMemoryCollection {
    fn find_all(&self, target: &CollectionTarget) -> Result<Vec<Value>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| AclError::load(target.to_string(), "lock poisoned"))?;
        Ok(documents.get(target).cloned().unwrap_or_default())
    }
}

/// Permission documents read from a collection.
pub struct CollectionSource {
    collection: Arc<dyn DocumentCollection>,
    target: CollectionTarget,
}

impl CollectionSource {
    pub fn new(collection: Arc<dyn DocumentCollection>, target: CollectionTarget) -> Self {
        Self { collection, target }
    }

    pub fn target(&self) -> &CollectionTarget {
        &self.target
    }
}

impl fmt::Debug for CollectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSource")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl RecordSource for CollectionSource {
    fn name(&self) -> String {
        format!("collection {}", self.target)
    }

    fn fetch(&self) -> Result<Vec<RawRecord>> {
        Ok(self
            .collection
            .find_all(&self.target)?
            .into_iter()
            .map(RawRecord::document)
            .collect())
    }
}
