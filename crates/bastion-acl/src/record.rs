//! Permission records and their raw source form.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{AclError, Result};
use crate::predicate::{Predicate, PredicateCompiler};
use crate::restriction::DataRestriction;

/// Wire key of the data restriction descriptor.
pub const RESTRICTION_KEY: &str = "mongo";

/// Where a raw record comes from. Static entries and collection documents
/// have different shapes and validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrigin {
    /// `{role | roles, predicate, priority?, mongo?}` from configuration.
    Static,
    /// `{_id, roles: [..], predicate, priority?, mongo?}` from a collection.
    Document,
}

/// An unvalidated record as fetched from a source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub origin: RecordOrigin,
    pub body: Value,
}

impl RawRecord {
    pub fn entry(body: Value) -> Self {
        Self {
            origin: RecordOrigin::Static,
            body,
        }
    }

    pub fn document(body: Value) -> Self {
        Self {
            origin: RecordOrigin::Document,
            body,
        }
    }
}

/// An immutable, validated permission.
#[derive(Clone)]
pub struct PermissionRecord {
    id: Option<Value>,
    roles: Vec<String>,
    predicate: Arc<dyn Predicate>,
    priority: i32,
    restriction: DataRestriction,
    load_index: usize,
}

impl fmt::Debug for PermissionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionRecord")
            .field("id", &self.id)
            .field("roles", &self.roles)
            .field("predicate", &self.predicate.describe())
            .field("priority", &self.priority)
            .field("load_index", &self.load_index)
            .finish_non_exhaustive()
    }
}

impl PermissionRecord {
    /// Builds a record directly. `roles` must not be empty.
    pub fn new<I, S>(
        roles: I,
        predicate: Arc<dyn Predicate>,
        priority: i32,
        restriction: DataRestriction,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles = dedup(roles.into_iter().map(Into::into));
        if roles.is_empty() {
            return Err(AclError::invalid("roles must not be empty"));
        }
        Ok(Self {
            id: None,
            roles,
            predicate,
            priority,
            restriction,
            load_index: 0,
        })
    }

    /// Validates a raw record and compiles its predicate.
    pub fn from_raw(
        raw: &RawRecord,
        compiler: &dyn PredicateCompiler,
        load_index: usize,
    ) -> Result<Self> {
        let Value::Object(body) = &raw.body else {
            return Err(AclError::invalid("permission must be a JSON object"));
        };

        let (id, roles) = match raw.origin {
            RecordOrigin::Static => (None, static_roles(body)?),
            RecordOrigin::Document => (body.get("_id").cloned(), document_roles(body)?),
        };

        let source = match body.get("predicate") {
            Some(Value::String(source)) => source,
            None if raw.origin == RecordOrigin::Static => {
                return Err(AclError::invalid("missing 'predicate'"));
            }
            Some(Value::Null) if raw.origin == RecordOrigin::Static => {
                return Err(AclError::invalid("'predicate' cannot be null"));
            }
            _ => return Err(AclError::invalid("predicate must be a string")),
        };
        let predicate = compiler.compile(source)?;

        let priority = match raw.origin {
            RecordOrigin::Static => static_priority(body, &roles, source)?,
            RecordOrigin::Document => document_priority(body, id.as_ref()),
        };

        let restriction = match body.get(RESTRICTION_KEY) {
            None => DataRestriction::default(),
            Some(value) => DataRestriction::from_value(value)?,
        };

        Ok(Self {
            id,
            roles,
            predicate,
            priority,
            restriction,
            load_index,
        })
    }

    #[must_use]
    pub fn with_id(mut self, id: Value) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub(crate) fn with_load_index(mut self, load_index: usize) -> Self {
        self.load_index = load_index;
        self
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Returns whether the record grants any of `roles`.
    pub fn grants_any<'a>(&self, mut roles: impl Iterator<Item = &'a str>) -> bool {
        roles.any(|role| self.roles.iter().any(|r| r == role))
    }

    pub fn predicate(&self) -> &Arc<dyn Predicate> {
        &self.predicate
    }

    /// Lower is higher priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn restriction(&self) -> &DataRestriction {
        &self.restriction
    }

    /// Position in load order. Breaks ties between equal priorities.
    pub fn load_index(&self) -> usize {
        self.load_index
    }

    /// Short identifier for logs: the id if present, else roles and predicate.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.to_string(),
            None => format!("{:?} {}", self.roles, self.predicate.describe()),
        }
    }
}

fn dedup(roles: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for role in roles {
        if !out.contains(&role) {
            out.push(role);
        }
    }
    out
}

fn static_roles(body: &Map<String, Value>) -> Result<Vec<String>> {
    let roles = match (body.get("role"), body.get("roles")) {
        (Some(_), Some(_)) => {
            return Err(AclError::invalid(
                "it specifies both 'role' and 'roles'; it requires just one or the other",
            ));
        }
        (Some(Value::String(role)), None) => vec![role.clone()],
        (Some(_), None) => return Err(AclError::invalid("'role' must be a string")),
        (None, Some(roles)) => string_array(roles)
            .ok_or_else(|| AclError::invalid("'roles' must be a non-empty array of strings"))?,
        (None, None) => return Err(AclError::invalid("does not specify 'role' or 'roles'")),
    };
    Ok(dedup(roles.into_iter()))
}

fn document_roles(body: &Map<String, Value>) -> Result<Vec<String>> {
    body.get("roles")
        .and_then(string_array)
        .map(|roles| dedup(roles.into_iter()))
        .ok_or_else(|| AclError::invalid("roles must be a non-empty array of strings"))
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

fn static_priority(body: &Map<String, Value>, roles: &[String], predicate: &str) -> Result<i32> {
    match body.get("priority") {
        None => {
            warn!(
                roles = ?roles,
                predicate = %predicate,
                "Permission has no priority; using lowest priority"
            );
            Ok(i32::MAX)
        }
        Some(value) => value
            .as_i64()
            .and_then(|p| i32::try_from(p).ok())
            .ok_or_else(|| AclError::invalid(format!("priority must be an integer, got {value}"))),
    }
}

fn document_priority(body: &Map<String, Value>, id: Option<&Value>) -> i32 {
    let priority = body.get("priority").and_then(|value| {
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
    });

    match priority {
        Some(p) => i32::try_from(p).unwrap_or(if p < 0 { i32::MIN } else { i32::MAX }),
        None => {
            warn!(
                id = ?id,
                "Permission document has no numeric priority; using lowest priority"
            );
            i32::MAX
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::ExpressionCompiler;
    use serde_json::json;
    use test_case::test_case;

    fn load(raw: RawRecord) -> Result<PermissionRecord> {
        PermissionRecord::from_raw(&raw, &ExpressionCompiler, 0)
    }

    #[test]
    fn static_entry_with_single_role() {
        let record = load(RawRecord::entry(json!({
            "role": "user",
            "predicate": "method=GET",
            "priority": 10,
        })))
        .unwrap();

        assert_eq!(record.roles(), ["user"]);
        assert_eq!(record.priority(), 10);
        assert!(record.id().is_none());
        assert_eq!(record.restriction(), &DataRestriction::default());
    }

    #[test]
    fn static_entry_without_priority_is_lowest() {
        let record = load(RawRecord::entry(json!({
            "roles": ["user", "admin", "user"],
            "predicate": "true",
        })))
        .unwrap();

        assert_eq!(record.priority(), i32::MAX);
        assert_eq!(record.roles(), ["user", "admin"]);
    }

    #[test_case(json!({"role": "a", "roles": ["b"], "predicate": "true"}); "both role and roles")]
    #[test_case(json!({"predicate": "true"}); "no roles")]
    #[test_case(json!({"roles": [], "predicate": "true"}); "empty roles")]
    #[test_case(json!({"role": "a"}); "missing predicate")]
    #[test_case(json!({"role": "a", "predicate": null}); "null predicate")]
    #[test_case(json!({"role": "a", "predicate": "method("}); "bad predicate")]
    #[test_case(json!({"role": "a", "predicate": "true", "priority": "high"}); "bad priority")]
    #[test_case(json!({"role": "a", "predicate": "true", "mongo": 1}); "bad restriction")]
    #[test_case(json!(["role", "a"]); "not an object")]
    fn rejects_bad_static_entries(body: Value) {
        assert!(matches!(
            load(RawRecord::entry(body)),
            Err(AclError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn document_keeps_id_and_restriction() {
        let record = load(RawRecord::document(json!({
            "_id": {"$oid": "5c3cab6cc9e77c0006e25281"},
            "roles": ["user"],
            "predicate": "path-prefix('/shop')",
            "priority": 3,
            "mongo": {"readFilter": {"owner": "%USER"}},
        })))
        .unwrap();

        assert_eq!(record.id(), Some(&json!({"$oid": "5c3cab6cc9e77c0006e25281"})));
        assert_eq!(
            record.restriction().read_filter,
            Some(json!({"owner": "%USER"}))
        );
    }

    #[test_case(json!("10"); "string")]
    #[test_case(Value::Null; "null")]
    fn document_with_non_numeric_priority_is_lowest(priority: Value) {
        let record = load(RawRecord::document(json!({
            "_id": 1,
            "roles": ["user"],
            "predicate": "true",
            "priority": priority,
        })))
        .unwrap();
        assert_eq!(record.priority(), i32::MAX);
    }

    #[test]
    fn document_with_fractional_priority_truncates() {
        let record = load(RawRecord::document(json!({
            "roles": ["user"],
            "predicate": "true",
            "priority": 7.9,
        })))
        .unwrap();
        assert_eq!(record.priority(), 7);
    }

    #[test_case(json!({"roles": "user", "predicate": "true"}); "roles not an array")]
    #[test_case(json!({"roles": ["user", 3], "predicate": "true"}); "non-string role")]
    #[test_case(json!({"roles": ["user"], "predicate": 42}); "predicate not a string")]
    #[test_case(json!({"roles": ["user"]}); "predicate missing")]
    #[test_case(json!({"roles": ["user"], "predicate": "true", "mongo": []}); "restriction not an object")]
    fn rejects_bad_documents(body: Value) {
        assert!(matches!(
            load(RawRecord::document(body)),
            Err(AclError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn document_with_null_restriction_uses_default() {
        let record = load(RawRecord::document(json!({
            "roles": ["user"],
            "predicate": "true",
            "priority": 1,
            "mongo": null,
        })))
        .unwrap();
        assert_eq!(record.restriction(), &DataRestriction::default());
    }

    #[test]
    fn grants_any_role() {
        let record = load(RawRecord::entry(json!({
            "roles": ["user", "editor"],
            "predicate": "true",
            "priority": 1,
        })))
        .unwrap();

        assert!(record.grants_any(["guest", "editor"].into_iter()));
        assert!(!record.grants_any(["guest"].into_iter()));
    }
}
