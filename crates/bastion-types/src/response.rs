//! The mutable response sink shared by interceptors and the handler.

use std::collections::BTreeMap;

use serde_json::{Value, json};

/// Response under construction for a single request.
///
/// Once [`Response::is_in_error`] is set the response is terminal: the
/// pipeline stops dispatching interceptors and the transport sends it as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: u16,
    in_error: bool,
    content: Option<Value>,
    headers: BTreeMap<String, String>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            in_error: false,
            content: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn is_in_error(&self) -> bool {
        self.in_error
    }

    pub fn set_in_error(&mut self, in_error: bool) {
        self.in_error = in_error;
    }

    /// Marks the response terminal with `status` and a JSON error body.
    pub fn set_error(&mut self, status: u16, message: impl Into<String>) {
        self.status = status;
        self.in_error = true;
        self.content = Some(json!({
            "http status code": status,
            "message": message.into(),
        }));
    }

    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }

    pub fn content_mut(&mut self) -> Option<&mut Value> {
        self.content.as_mut()
    }

    pub fn set_content(&mut self, content: Value) {
        self.content = Some(content);
    }

    pub fn clear_content(&mut self) {
        self.content = None;
    }

    /// Sets a header; names are stored lower-case.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}
