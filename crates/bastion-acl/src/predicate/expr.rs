//! Compiled expression tree and its evaluation against a request.
//!
//! Evaluation is total: an attribute that cannot be read is absent, and any
//! test against an absent value is `false`.

use std::borrow::Cow;

use bastion_types::{Method, Request};
use regex::Regex;

// ============================================================================
// Attributes and operands
// ============================================================================

/// A request attribute readable by predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Attribute {
    Method,
    Path,
    User,
    ResourceType,
    Service,
    Roles,
    Header(String),
    QueryParam(String),
}

impl Attribute {
    /// Parses the body of a `%x` / `%{...}` reference.
    pub(crate) fn from_reference(reference: &str) -> Option<Self> {
        if let Some(inner) = reference
            .strip_prefix('{')
            .and_then(|r| r.strip_suffix('}'))
        {
            let mut parts = inner.splitn(2, ',').map(str::trim);
            let kind = parts.next()?;
            return match (kind, parts.next()) {
                ("i", Some(name)) if !name.is_empty() => Some(Attribute::Header(name.to_string())),
                ("q", Some(name)) if !name.is_empty() => {
                    Some(Attribute::QueryParam(name.to_string()))
                }
                ("roles", None) => Some(Attribute::Roles),
                ("service", None) => Some(Attribute::Service),
                (single, None) => Self::from_reference(single),
                _ => None,
            };
        }

        match reference {
            "m" => Some(Attribute::Method),
            "R" | "U" => Some(Attribute::Path),
            "u" => Some(Attribute::User),
            "t" => Some(Attribute::ResourceType),
            _ => None,
        }
    }

    /// Bare attribute names accepted on the left side of a comparison.
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "method" => Some(Attribute::Method),
            "path" => Some(Attribute::Path),
            "user" => Some(Attribute::User),
            "type" => Some(Attribute::ResourceType),
            "service" => Some(Attribute::Service),
            "roles" => Some(Attribute::Roles),
            _ => None,
        }
    }

    fn read<'r>(&self, request: &'r Request) -> Vec<Cow<'r, str>> {
        match self {
            Attribute::Method => vec![Cow::Borrowed(request.method().as_str())],
            Attribute::Path => vec![Cow::Borrowed(request.path())],
            Attribute::User => request
                .principal()
                .map(|p| Cow::Borrowed(p.id.as_str()))
                .into_iter()
                .collect(),
            Attribute::ResourceType => vec![Cow::Borrowed(request.resource_type().as_str())],
            Attribute::Service => request.service().map(Cow::Borrowed).into_iter().collect(),
            Attribute::Roles => request
                .principal()
                .map(|p| p.roles.iter().map(|r| Cow::Borrowed(r.as_str())).collect())
                .unwrap_or_default(),
            Attribute::Header(name) => request
                .headers()
                .get(name)
                .map(Cow::Borrowed)
                .into_iter()
                .collect(),
            Attribute::QueryParam(name) => request
                .query()
                .get(name)
                .map(|values| values.iter().map(|v| Cow::Borrowed(v.as_str())).collect())
                .unwrap_or_default(),
        }
    }
}

/// Either side of a comparison or a function argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operand {
    Literal(String),
    Attribute(Attribute),
}

impl Operand {
    /// Values of the operand for this request. Empty means absent.
    pub(crate) fn values<'a>(&'a self, request: &'a Request) -> Vec<Cow<'a, str>> {
        match self {
            Operand::Literal(value) => vec![Cow::Borrowed(value.as_str())],
            Operand::Attribute(attribute) => attribute.read(request),
        }
    }
}

// ============================================================================
// Path templates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Variable,
    Rest,
}

/// A path template such as `/{db}/{coll}/*`.
///
/// `{name}` matches exactly one non-empty segment; a trailing `*` matches any
/// remainder, including none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathTemplate {
    segments: Vec<TemplateSegment>,
}

impl PathTemplate {
    pub(crate) fn parse(template: &str) -> Result<Self, String> {
        let raw: Vec<&str> = template.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, segment) in raw.iter().enumerate() {
            if *segment == "*" {
                if i + 1 != raw.len() {
                    return Err(format!("'*' must be the last segment of '{template}'"));
                }
                segments.push(TemplateSegment::Rest);
            } else if segment.starts_with('{') && segment.ends_with('}') && segment.len() > 2 {
                segments.push(TemplateSegment::Variable);
            } else if segment.contains('{') || segment.contains('}') {
                return Err(format!("malformed variable segment '{segment}' in '{template}'"));
            } else {
                segments.push(TemplateSegment::Literal((*segment).to_string()));
            }
        }
        Ok(Self { segments })
    }

    pub(crate) fn matches(&self, path: &str) -> bool {
        let mut parts = path.split('/').filter(|s| !s.is_empty());
        for segment in &self.segments {
            match segment {
                TemplateSegment::Rest => return true,
                TemplateSegment::Variable => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                TemplateSegment::Literal(expected) => {
                    if parts.next() != Some(expected.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

// ============================================================================
// Expression tree
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Const(bool),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Operand,
        right: Operand,
        negate: bool,
    },
    Method(Vec<Method>),
    Path(Vec<String>),
    PathPrefix(Vec<String>),
    PathSuffix(Vec<String>),
    PathTemplate(Vec<PathTemplate>),
    /// `pattern` is already anchored when full-match was requested.
    Regex {
        pattern: Regex,
        value: Operand,
    },
    Equals(Vec<Operand>),
    Contains {
        value: Operand,
        search: Vec<Operand>,
    },
    Exists(Vec<Operand>),
    Authenticated,
    In {
        value: Operand,
        array: Vec<Operand>,
    },
    Roles(Vec<String>),
    QueryParamsContain(Vec<String>),
    QueryParamsBlacklist(Vec<String>),
    QueryParamsSize(usize),
    Header {
        name: String,
        value: Option<Operand>,
    },
    ResourceType(Vec<String>),
    HandledBy(Vec<String>),
}

fn any_common(left: &[Cow<'_, str>], right: &[Cow<'_, str>]) -> bool {
    left.iter().any(|l| right.iter().any(|r| l == r))
}

fn normalize_path(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

impl Expr {
    pub(crate) fn eval(&self, request: &Request) -> bool {
        match self {
            Expr::Const(value) => *value,
            Expr::And(items) => items.iter().all(|e| e.eval(request)),
            Expr::Or(items) => items.iter().any(|e| e.eval(request)),
            Expr::Not(inner) => !inner.eval(request),

            Expr::Compare {
                left,
                right,
                negate,
            } => {
                let left = left.values(request);
                let right = right.values(request);
                if left.is_empty() || right.is_empty() {
                    return false;
                }
                any_common(&left, &right) != *negate
            }

            Expr::Method(methods) => methods.contains(&request.method()),
            Expr::Path(paths) => {
                let actual = normalize_path(request.path());
                paths.iter().any(|p| normalize_path(p) == actual)
            }
            Expr::PathPrefix(prefixes) => {
                let actual = normalize_path(request.path());
                prefixes.iter().any(|prefix| {
                    let prefix = normalize_path(prefix);
                    prefix == "/"
                        || actual == prefix
                        || actual
                            .strip_prefix(prefix)
                            .is_some_and(|rest| rest.starts_with('/'))
                })
            }
            Expr::PathSuffix(suffixes) => {
                let actual = normalize_path(request.path());
                suffixes.iter().any(|s| actual.ends_with(s.as_str()))
            }
            Expr::PathTemplate(templates) => templates.iter().any(|t| t.matches(request.path())),

            Expr::Regex { pattern, value } => {
                value.values(request).iter().any(|v| pattern.is_match(v))
            }

            Expr::Equals(operands) => {
                let Some((first, rest)) = operands.split_first() else {
                    return false;
                };
                let first = first.values(request);
                if first.is_empty() {
                    return false;
                }
                rest.iter().all(|other| {
                    let other = other.values(request);
                    !other.is_empty() && any_common(&first, &other)
                })
            }

            Expr::Contains { value, search } => {
                let values = value.values(request);
                search.iter().any(|s| {
                    s.values(request)
                        .iter()
                        .any(|needle| values.iter().any(|v| v.contains(&**needle)))
                })
            }

            Expr::Exists(operands) => operands.iter().all(|o| !o.values(request).is_empty()),
            Expr::Authenticated => request.is_authenticated(),

            Expr::In { value, array } => {
                let values = value.values(request);
                !values.is_empty()
                    && array
                        .iter()
                        .any(|candidate| any_common(&values, &candidate.values(request)))
            }

            Expr::Roles(roles) => request
                .principal()
                .is_some_and(|p| roles.iter().any(|r| p.has_role(r))),

            Expr::QueryParamsContain(names) => {
                names.iter().all(|n| request.query().contains_key(n))
            }
            Expr::QueryParamsBlacklist(names) => {
                names.iter().any(|n| request.query().contains_key(n))
            }
            Expr::QueryParamsSize(max) => request.query().len() <= *max,

            Expr::Header { name, value } => match (request.headers().get(name), value) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => expected
                    .values(request)
                    .iter()
                    .any(|e| &**e == actual),
            },

            Expr::ResourceType(types) => {
                let actual = request.resource_type().as_str();
                types.iter().any(|t| t.eq_ignore_ascii_case(actual))
            }
            Expr::HandledBy(services) => services.iter().any(|s| request.is_handled_by(s)),
        }
    }
}
