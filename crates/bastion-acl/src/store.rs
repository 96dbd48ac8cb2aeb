//! The active permission set and its atomic reload.
//!
//! Readers take a [`snapshot`](PermissionStore::snapshot), an `Arc` to an
//! immutable [`PermissionSet`], and release the lock immediately. A reload
//! builds a complete new set before swapping it in; a failed reload leaves
//! the previous set active.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, info, instrument};

use crate::error::{AclError, Result};
use crate::predicate::{ExpressionCompiler, PredicateCompiler};
use crate::record::PermissionRecord;
use crate::source::RecordSource;

// ============================================================================
// Permission set
// ============================================================================

/// An immutable set of permission records.
///
/// Records are kept in resolution order: ascending priority, then ascending
/// load index.
#[derive(Debug, Default)]
pub struct PermissionSet {
    records: Vec<Arc<PermissionRecord>>,
    generation: u64,
}

impl PermissionSet {
    /// Builds a set from records in load order.
    pub fn new(records: impl IntoIterator<Item = PermissionRecord>) -> Self {
        let mut records: Vec<Arc<PermissionRecord>> = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| Arc::new(record.with_load_index(index)))
            .collect();
        records.sort_by_key(|r| (r.priority(), r.load_index()));
        Self {
            records,
            generation: 0,
        }
    }

    fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Records in resolution order.
    pub fn records(&self) -> &[Arc<PermissionRecord>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Identifies the load that produced this set. Starts at 1 for a store.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Fetches and validates every record from `sources`, in order.
///
/// Fails on the first invalid record, naming its source and index.
pub fn load_all(
    sources: &[Box<dyn RecordSource>],
    compiler: &dyn PredicateCompiler,
) -> Result<PermissionSet> {
    let mut records = Vec::new();

    for source in sources {
        let fetched = source.fetch()?;
        for (index, raw) in fetched.iter().enumerate() {
            let record = PermissionRecord::from_raw(raw, compiler, records.len()).map_err(
                |e| match e {
                    AclError::InvalidDefinition { reason } => AclError::invalid(format!(
                        "{} record #{index}: {reason}",
                        source.name()
                    )),
                    other => other,
                },
            )?;
            records.push(record);
        }
    }

    Ok(PermissionSet::new(records))
}

// ============================================================================
// Permission store
// ============================================================================

/// Holds the active [`PermissionSet`] and reloads it from its sources.
pub struct PermissionStore {
    sources: Vec<Box<dyn RecordSource>>,
    compiler: Arc<dyn PredicateCompiler>,
    current: RwLock<Arc<PermissionSet>>,
}

impl std::fmt::Debug for PermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("PermissionStore")
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("records", &snapshot.len())
            .field("generation", &snapshot.generation())
            .finish_non_exhaustive()
    }
}

impl PermissionStore {
    /// Loads the first set with the built-in expression compiler.
    ///
    /// Fails if any source or record is invalid.
    pub fn open(sources: Vec<Box<dyn RecordSource>>) -> Result<Self> {
        Self::open_with(sources, Arc::new(ExpressionCompiler))
    }

    /// Loads the first set with a custom predicate compiler.
    pub fn open_with(
        sources: Vec<Box<dyn RecordSource>>,
        compiler: Arc<dyn PredicateCompiler>,
    ) -> Result<Self> {
        let set = load_all(&sources, compiler.as_ref())?.with_generation(1);
        info!(
            records = set.len(),
            sources = sources.len(),
            generation = set.generation(),
            "Permissions loaded"
        );

        Ok(Self {
            sources,
            compiler,
            current: RwLock::new(Arc::new(set)),
        })
    }

    /// Returns the active set.
    pub fn snapshot(&self) -> Arc<PermissionSet> {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a consistent set.
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Generation of the active set.
    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    /// Reloads every source and swaps in the new set.
    ///
    /// On failure the previous set stays active and the error is returned.
    #[instrument(skip(self))]
    pub fn reload(&self) -> Result<Arc<PermissionSet>> {
        let loaded = match load_all(&self.sources, self.compiler.as_ref()) {
            Ok(set) => set,
            Err(e) => {
                error!(error = %e, generation = self.generation(), "Permission reload failed; keeping previous set");
                return Err(e);
            }
        };

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let set = Arc::new(loaded.with_generation(current.generation() + 1));
        *current = Arc::clone(&set);
        drop(current);

        info!(
            records = set.len(),
            generation = set.generation(),
            "Permissions reloaded"
        );
        Ok(set)
    }
}
