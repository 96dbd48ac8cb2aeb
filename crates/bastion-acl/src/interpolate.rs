//! Placeholder substitution in filter and merge templates.
//!
//! Recognized placeholders:
//! - `%USER`: the principal id. Left untouched for anonymous requests.
//! - `%ROLES`: the principal's roles as a JSON array, `[]` when anonymous.
//! - `%NOW`: `{"$date": <epoch millis>}` of the supplied instant.
//!
//! Templates are either JSON objects, walked structurally, or strings holding
//! JSON text, substituted textually and then parsed. Either way the result
//! must be a JSON object.

use bastion_types::Request;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::error::{AclError, Result};

pub const USER: &str = "%USER";
pub const ROLES: &str = "%ROLES";
pub const NOW: &str = "%NOW";

/// Values placeholders expand to for one request.
struct Bindings {
    user: Option<String>,
    roles: Value,
    now: Value,
}

impl Bindings {
    fn new(request: &Request, now: DateTime<Utc>) -> Self {
        let principal = request.principal();
        Self {
            user: principal.map(|p| p.id.clone()),
            roles: principal
                .map(|p| json!(p.roles.iter().collect::<Vec<_>>()))
                .unwrap_or_else(|| json!([])),
            now: json!({ "$date": now.timestamp_millis() }),
        }
    }

    /// Value replacing a string that consists of a single placeholder.
    fn whole(&self, text: &str) -> Option<Value> {
        match text {
            USER => self.user.clone().map(Value::String),
            ROLES => Some(self.roles.clone()),
            NOW => Some(self.now.clone()),
            _ => None,
        }
    }

    /// Substitutes placeholders inside a string value.
    fn inline(&self, text: &str) -> String {
        self.expand(text, self.user.clone())
    }

    /// Substitutes placeholders inside JSON source text. `%USER` is
    /// JSON-escaped so it can sit between quotes.
    fn text(&self, source: &str) -> String {
        let escaped = self.user.as_ref().map(|user| {
            let quoted = Value::String(user.clone()).to_string();
            quoted[1..quoted.len() - 1].to_string()
        });
        self.expand(source, escaped)
    }

    /// Replaces every placeholder in one left-to-right pass, so substituted
    /// values are never scanned again.
    fn expand(&self, text: &str, user: Option<String>) -> String {
        let roles = self.roles.to_string();
        let now = self.now.to_string();
        let placeholders = [(USER, user), (ROLES, Some(roles)), (NOW, Some(now))];

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(at) = rest.find('%') {
            out.push_str(&rest[..at]);
            rest = &rest[at..];
            let hit = placeholders
                .iter()
                .find(|(token, value)| value.is_some() && rest.starts_with(*token));
            match hit {
                Some((token, Some(value))) => {
                    out.push_str(value);
                    rest = &rest[token.len()..];
                }
                _ => {
                    out.push('%');
                    rest = &rest[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Interpolates `template` for `request`, using `now` for `%NOW`.
///
/// # Errors
///
/// [`AclError::InvalidDefinition`] when the result is not a JSON object.
pub fn interpolate(template: &Value, request: &Request, now: DateTime<Utc>) -> Result<Value> {
    let bindings = Bindings::new(request, now);

    let result = match template {
        Value::String(source) => serde_json::from_str(&bindings.text(source)).map_err(|e| {
            AclError::invalid(format!("interpolated template is not valid JSON: {e}"))
        })?,
        other => substitute(other, &bindings),
    };

    if result.is_object() {
        Ok(result)
    } else {
        Err(AclError::invalid(
            "interpolated template is not a JSON object",
        ))
    }
}

fn substitute(value: &Value, bindings: &Bindings) -> Value {
    match value {
        Value::String(text) => bindings
            .whole(text)
            .unwrap_or_else(|| Value::String(bindings.inline(text))),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, bindings)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, bindings)))
                .collect(),
        ),
        other => other.clone(),
    }
}
