//! Data-level restrictions attached to permission records.
//!
//! A [`DataRestriction`] is the static descriptor declared under the `mongo`
//! key of a permission. At resolution time it is turned into an
//! [`EffectiveRestriction`] for one request: filter templates are
//! interpolated and the request is classified (management, bulk, write mode).

use std::collections::BTreeSet;

use bastion_types::{Method, Request, ResourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AclError, Result};
use crate::interpolate::interpolate;

/// Query parameter that selects the write mode of a write request.
pub const WRITE_MODE_PARAM: &str = "writeMode";

// ============================================================================
// Static descriptor
// ============================================================================

/// Data restriction declared by a permission.
///
/// Field names are camelCase on the wire. The legacy `whitelist*` spellings of
/// the `allow*` flags are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct DataRestriction {
    #[serde(alias = "whitelistManagementRequests")]
    pub allow_management_requests: bool,
    #[serde(alias = "whitelistBulkPatch")]
    pub allow_bulk_patch: bool,
    #[serde(alias = "whitelistBulkDelete")]
    pub allow_bulk_delete: bool,
    #[serde(alias = "whitelistWriteMode")]
    pub allow_write_mode: bool,
    /// Filter template applied to reads.
    pub read_filter: Option<Value>,
    /// Filter template applied to writes.
    pub write_filter: Option<Value>,
    /// Projection `{field: 0|1}` applied to response content.
    pub project_response: Option<Map<String, Value>>,
    /// Document template merged into write bodies.
    pub merge_request: Option<Value>,
    pub forbid_read_fields: Vec<String>,
    pub forbid_write_fields: Vec<String>,
}

impl DataRestriction {
    /// Parses and validates a descriptor.
    ///
    /// `null` yields the default (everything forbidden, no filters).
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        if !value.is_object() {
            return Err(AclError::invalid("mongo must be a JSON object or null"));
        }

        let restriction: Self = serde_json::from_value(value.clone())
            .map_err(|e| AclError::invalid(format!("invalid mongo restriction: {e}")))?;
        restriction.validate()?;
        Ok(restriction)
    }

    fn validate(&self) -> Result<()> {
        for (name, template) in [
            ("readFilter", &self.read_filter),
            ("writeFilter", &self.write_filter),
            ("mergeRequest", &self.merge_request),
        ] {
            match template {
                None | Some(Value::Object(_) | Value::String(_)) => {}
                Some(_) => {
                    return Err(AclError::invalid(format!(
                        "{name} must be a JSON object or a JSON string"
                    )));
                }
            }
        }

        if let Some(projection) = &self.project_response {
            for (field, flag) in projection {
                if projection_flag(flag).is_none() {
                    return Err(AclError::invalid(format!(
                        "projectResponse field '{field}' must be 0 or 1"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Computes the restriction for one request, interpolating templates
    /// with `now` as the value of `%NOW`.
    pub fn effective(&self, request: &Request, now: DateTime<Utc>) -> Result<EffectiveRestriction> {
        let render = |template: &Option<Value>| {
            template
                .as_ref()
                .map(|t| interpolate(t, request, now))
                .transpose()
        };

        let mut forbidden_read_fields: BTreeSet<String> =
            self.forbid_read_fields.iter().cloned().collect();
        if let Some(projection) = &self.project_response {
            forbidden_read_fields.extend(
                projection
                    .iter()
                    .filter(|(_, flag)| projection_flag(flag) == Some(false))
                    .map(|(field, _)| field.clone()),
            );
        }

        Ok(EffectiveRestriction {
            management_request: is_management_request(request),
            bulk_patch_request: is_bulk(request, Method::Patch),
            bulk_delete_request: is_bulk(request, Method::Delete),
            write_mode_requested: request.query().contains_key(WRITE_MODE_PARAM),
            management_allowed: self.allow_management_requests,
            bulk_patch_allowed: self.allow_bulk_patch,
            bulk_delete_allowed: self.allow_bulk_delete,
            write_mode_allowed: self.allow_write_mode,
            forbidden_read_fields,
            forbidden_write_fields: self.forbid_write_fields.iter().cloned().collect(),
            read_filter: render(&self.read_filter)?,
            write_filter: render(&self.write_filter)?,
            merge_request: render(&self.merge_request)?,
            projection: self.project_response.clone(),
        })
    }
}

/// Reads a projection flag: `0`/`false` excludes, `1`/`true` includes.
fn projection_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

fn is_bulk(request: &Request, method: Method) -> bool {
    request.resource_type() == ResourceType::BulkDocuments && request.method() == method
}

/// Returns whether the request manages the store rather than its data:
/// creating or deleting databases, collections and file buckets, indexes,
/// schema stores and metadata.
pub fn is_management_request(request: &Request) -> bool {
    let method = request.method();
    match request.resource_type() {
        ResourceType::Db | ResourceType::FilesBucket => method != Method::Get,
        ResourceType::Collection => !matches!(method, Method::Get | Method::Post),
        ResourceType::Index
        | ResourceType::CollectionIndexes
        | ResourceType::Schema
        | ResourceType::SchemaStore
        | ResourceType::SchemaStoreSize
        | ResourceType::DbMeta
        | ResourceType::CollectionMeta
        | ResourceType::FilesBucketMeta
        | ResourceType::SchemaStoreMeta => true,
        _ => false,
    }
}

// ============================================================================
// Effective restriction
// ============================================================================

/// The restriction in force for one request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EffectiveRestriction {
    /// The request is a management operation.
    pub management_request: bool,
    /// The request is a PATCH on bulk documents.
    pub bulk_patch_request: bool,
    /// The request is a DELETE on bulk documents.
    pub bulk_delete_request: bool,
    /// The request carries the `writeMode` query parameter.
    pub write_mode_requested: bool,
    pub management_allowed: bool,
    pub bulk_patch_allowed: bool,
    pub bulk_delete_allowed: bool,
    pub write_mode_allowed: bool,
    /// Explicitly forbidden fields plus fields excluded by the projection.
    pub forbidden_read_fields: BTreeSet<String>,
    pub forbidden_write_fields: BTreeSet<String>,
    pub read_filter: Option<Value>,
    pub write_filter: Option<Value>,
    pub merge_request: Option<Value>,
    pub projection: Option<Map<String, Value>>,
}

impl EffectiveRestriction {
    pub fn management_forbidden(&self) -> bool {
        self.management_request && !self.management_allowed
    }

    pub fn bulk_forbidden(&self) -> bool {
        (self.bulk_patch_request && !self.bulk_patch_allowed)
            || (self.bulk_delete_request && !self.bulk_delete_allowed)
    }

    pub fn write_mode_forbidden(&self) -> bool {
        self.write_mode_requested && !self.write_mode_allowed
    }

    /// Returns why the request is refused, if it is.
    pub fn denial_reason(&self) -> Option<&'static str> {
        if self.management_forbidden() {
            Some("management requests are not allowed")
        } else if self.bulk_patch_request && !self.bulk_patch_allowed {
            Some("bulk PATCH requests are not allowed")
        } else if self.bulk_delete_request && !self.bulk_delete_allowed {
            Some("bulk DELETE requests are not allowed")
        } else if self.write_mode_forbidden() {
            Some("the writeMode query parameter is not allowed")
        } else {
            None
        }
    }

    /// Returns whether the restriction lets the request through.
    pub fn permits_request(&self) -> bool {
        self.denial_reason().is_none()
    }

    /// Fields the projection explicitly includes. Empty when the projection
    /// only excludes.
    pub fn included_fields(&self) -> BTreeSet<String> {
        self.projection
            .iter()
            .flatten()
            .filter(|(_, flag)| projection_flag(flag) == Some(true))
            .map(|(field, _)| field.clone())
            .collect()
    }

    /// Applies the projection and forbidden read fields to response content.
    ///
    /// Objects are projected directly; arrays are projected element-wise.
    pub fn project(&self, content: &mut Value) {
        let included = self.included_fields();
        match content {
            Value::Array(items) => {
                for item in items {
                    self.project_document(item, &included);
                }
            }
            other => self.project_document(other, &included),
        }
    }

    fn project_document(&self, document: &mut Value, included: &BTreeSet<String>) {
        let Value::Object(map) = document else {
            return;
        };
        if !included.is_empty() {
            map.retain(|key, _| {
                included.contains(key)
                    || included.iter().any(|f| f.split('.').next() == Some(key.as_str()))
                    || (key == "_id" && !self.forbidden_read_fields.contains("_id"))
            });
        }
        for field in &self.forbidden_read_fields {
            remove_path(document, field);
        }
    }

    /// Returns the first forbidden write field touched by `body`, if any.
    pub fn forbidden_write_in(&self, body: &Value) -> Option<String> {
        if self.forbidden_write_fields.is_empty() {
            return None;
        }
        let written = written_paths(body);
        self.forbidden_write_fields
            .iter()
            .find(|forbidden| {
                written.iter().any(|path| {
                    path == *forbidden
                        || path.starts_with(&format!("{forbidden}."))
                        || forbidden.starts_with(&format!("{path}."))
                })
            })
            .cloned()
    }
}

/// Removes a dotted path from a document, descending into arrays.
fn remove_path(document: &mut Value, path: &str) {
    match document {
        Value::Object(map) => match path.split_once('.') {
            None => {
                map.remove(path);
            }
            Some((head, rest)) => {
                if let Some(child) = map.get_mut(head) {
                    remove_path(child, rest);
                }
            }
        },
        Value::Array(items) => {
            for item in items {
                remove_path(item, path);
            }
        }
        _ => {}
    }
}

/// Collects every dotted path a write body assigns, including parents.
///
/// Update operators (`$set`, `$unset`, ...) are unwrapped so that
/// `{"$set": {"a.b": 1}}` writes `a.b`. `$rename` writes both its source
/// keys and its target values.
fn written_paths(body: &Value) -> Vec<String> {
    fn walk(value: &Value, prefix: &str, out: &mut Vec<String>) {
        let Value::Object(map) = value else {
            return;
        };
        for (key, child) in map {
            if prefix.is_empty() && key.starts_with('$') {
                if key == "$rename" {
                    if let Value::Object(renames) = child {
                        out.extend(renames.values().filter_map(Value::as_str).map(String::from));
                    }
                }
                walk(child, "", out);
                continue;
            }
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            walk(child, &path, out);
            out.push(path);
        }
    }

    let mut out = Vec::new();
    match body {
        Value::Array(items) => items.iter().for_each(|item| walk(item, "", &mut out)),
        other => walk(other, "", &mut out),
    }
    out
}
