//! Classification of document-store request paths.
//!
//! Paths follow the layout `/<db>/<collection>/<document>` with reserved
//! segments (`_meta`, `_indexes`, `_schemas`, `_aggrs`, `_size`) and file
//! buckets named `<bucket>.files`.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a request path addresses in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Root,
    Db,
    DbMeta,
    Collection,
    CollectionMeta,
    CollectionIndexes,
    Index,
    Document,
    BulkDocuments,
    Aggregation,
    FilesBucket,
    FilesBucketMeta,
    File,
    SchemaStore,
    SchemaStoreMeta,
    SchemaStoreSize,
    Schema,
    Transactions,
    Transaction,
    /// Not a document-store resource (served by another service).
    Other,
}

const FILES_SUFFIX: &str = ".files";

impl ResourceType {
    /// Every resource type, in declaration order.
    pub const ALL: [ResourceType; 20] = [
        ResourceType::Root,
        ResourceType::Db,
        ResourceType::DbMeta,
        ResourceType::Collection,
        ResourceType::CollectionMeta,
        ResourceType::CollectionIndexes,
        ResourceType::Index,
        ResourceType::Document,
        ResourceType::BulkDocuments,
        ResourceType::Aggregation,
        ResourceType::FilesBucket,
        ResourceType::FilesBucketMeta,
        ResourceType::File,
        ResourceType::SchemaStore,
        ResourceType::SchemaStoreMeta,
        ResourceType::SchemaStoreSize,
        ResourceType::Schema,
        ResourceType::Transactions,
        ResourceType::Transaction,
        ResourceType::Other,
    ];

    /// Classifies a request path.
    ///
    /// # Examples
    ///
    /// ```
    /// # use bastion_types::ResourceType;
    /// assert_eq!(ResourceType::classify("/"), ResourceType::Root);
    /// assert_eq!(ResourceType::classify("/shop/orders"), ResourceType::Collection);
    /// assert_eq!(ResourceType::classify("/shop/orders/*"), ResourceType::BulkDocuments);
    /// assert_eq!(ResourceType::classify("/shop/_schemas/_size"), ResourceType::SchemaStoreSize);
    /// ```
    pub fn classify(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if segments.first() == Some(&"_sessions") {
            return match segments.as_slice() {
                [_, _, "_txns"] => ResourceType::Transactions,
                [_, _, "_txns", _] => ResourceType::Transaction,
                _ => ResourceType::Other,
            };
        }

        match segments.as_slice() {
            [] => ResourceType::Root,
            [db] if db.starts_with('_') => ResourceType::Other,
            [_] => ResourceType::Db,
            [_, "_meta"] => ResourceType::DbMeta,
            [_, "_schemas"] => ResourceType::SchemaStore,
            [_, coll] if coll.ends_with(FILES_SUFFIX) => ResourceType::FilesBucket,
            [_, _] => ResourceType::Collection,
            [_, "_schemas", "_meta"] => ResourceType::SchemaStoreMeta,
            [_, "_schemas", "_size"] => ResourceType::SchemaStoreSize,
            [_, "_schemas", _] => ResourceType::Schema,
            [_, coll, "_meta"] if coll.ends_with(FILES_SUFFIX) => ResourceType::FilesBucketMeta,
            [_, coll, _] if coll.ends_with(FILES_SUFFIX) => ResourceType::File,
            [_, _, "_meta"] => ResourceType::CollectionMeta,
            [_, _, "_indexes"] => ResourceType::CollectionIndexes,
            [_, _, "*"] => ResourceType::BulkDocuments,
            [_, _, _] => ResourceType::Document,
            [_, _, "_indexes", _] => ResourceType::Index,
            [_, _, "_aggrs", _] => ResourceType::Aggregation,
            [_, coll, _, "binary"] if coll.ends_with(FILES_SUFFIX) => ResourceType::File,
            _ => ResourceType::Other,
        }
    }

    /// Returns the wire name used in predicates, e.g. `COLLECTION_META`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Root => "ROOT",
            ResourceType::Db => "DB",
            ResourceType::DbMeta => "DB_META",
            ResourceType::Collection => "COLLECTION",
            ResourceType::CollectionMeta => "COLLECTION_META",
            ResourceType::CollectionIndexes => "COLLECTION_INDEXES",
            ResourceType::Index => "INDEX",
            ResourceType::Document => "DOCUMENT",
            ResourceType::BulkDocuments => "BULK_DOCUMENTS",
            ResourceType::Aggregation => "AGGREGATION",
            ResourceType::FilesBucket => "FILES_BUCKET",
            ResourceType::FilesBucketMeta => "FILES_BUCKET_META",
            ResourceType::File => "FILE",
            ResourceType::SchemaStore => "SCHEMA_STORE",
            ResourceType::SchemaStoreMeta => "SCHEMA_STORE_META",
            ResourceType::SchemaStoreSize => "SCHEMA_STORE_SIZE",
            ResourceType::Schema => "SCHEMA",
            ResourceType::Transactions => "TRANSACTIONS",
            ResourceType::Transaction => "TRANSACTION",
            ResourceType::Other => "OTHER",
        }
    }
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown resource type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownResourceType(pub String);

impl Display for UnknownResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown resource type '{}'", self.0)
    }
}

impl std::error::Error for UnknownResourceType {}

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    /// Parses a wire name such as `COLLECTION` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownResourceType(s.to_string()))
    }
}
