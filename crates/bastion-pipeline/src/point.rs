//! The fixed lifecycle points at which interceptors run.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A point in the request lifecycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterceptPoint {
    /// Before authentication.
    BeforeAuth,
    /// After authentication, before the handler. Authorization runs here.
    AfterAuth,
    /// Immediately before the request handler.
    BeforeHandler,
    /// Immediately after the request handler.
    AfterHandler,
    /// While the response is being produced.
    Response,
}

impl InterceptPoint {
    /// Every point, in execution order.
    pub const ALL: [InterceptPoint; 5] = [
        InterceptPoint::BeforeAuth,
        InterceptPoint::AfterAuth,
        InterceptPoint::BeforeHandler,
        InterceptPoint::AfterHandler,
        InterceptPoint::Response,
    ];

    /// Position in execution order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The point that runs after this one.
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InterceptPoint::BeforeAuth => "before-auth",
            InterceptPoint::AfterAuth => "after-auth",
            InterceptPoint::BeforeHandler => "before-handler",
            InterceptPoint::AfterHandler => "after-handler",
            InterceptPoint::Response => "response",
        }
    }
}

impl Display for InterceptPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterceptPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown intercept point '{s}'"))
    }
}
