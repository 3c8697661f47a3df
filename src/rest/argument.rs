//! The REST argument bag.
//!
//! One JSON object describing a request or a response: named sub-trees
//! for the URI split, query arguments, headers, cookies, body and answer.
//! A response argument serializes wholesale as the reply body.
use http::{HeaderMap, Method, StatusCode, request};
use serde_json::{Map, Value, json};
use std::fmt;

use crate::cookie::{self, Cookie};
use crate::error::HttpError;

use super::handler::CommandType;

pub const JSON_URI: &str = "uri";
pub const JSON_BASE: &str = "base";
pub const JSON_SUB_URI: &str = "subUri";
pub const JSON_URI_ARGS: &str = "uriArgs";
pub const JSON_METHOD: &str = "method";
pub const JSON_HEADERS: &str = "headers";
pub const JSON_COOKIES: &str = "cookies";
pub const JSON_BODY: &str = "body";
pub const JSON_ANSWER: &str = "answer";
pub const JSON_FILTER: &str = "filter";
pub const JSON_RESULTS: &str = "results";
pub const JSON_DETAIL: &str = "detail";
pub const JSON_COMMAND: &str = "command";
pub const JSON_COUNT: &str = "count";
pub const JSON_LIMIT: &str = "limit";
pub const JSON_RESULT: &str = "result";
pub const JSON_ID: &str = "id";
pub const JSON_PATH: &str = "path";

pub const X_ALLOW_URIS: &str = "X-Allow-URIs";
pub const X_DETAILED_ALLOW: &str = "X-Detailed-Allow";

const DEFAULT_LIMIT: usize = 100;

/// Structured bag of named sub-trees, used both as parsed request and as
/// response description.
#[derive(Debug, Default, Clone)]
pub struct RestArgument {
    root: Map<String, Value>,
}

impl RestArgument {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Request side =====

    /// Record the request line: URI split into base and sub segments,
    /// query arguments, and the method. A query parameter with more than
    /// one value is a malformed request.
    pub fn set_request(&mut self, parts: &request::Parts) -> Result<(), HttpError> {
        let path = parts.uri.path();
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let base = segments.next().unwrap_or("").to_owned();
        let sub: Vec<Value> = segments.map(|s| Value::String(s.to_owned())).collect();
        self.root.insert(JSON_URI.into(), json!(path));
        self.root.insert(JSON_BASE.into(), json!(base));
        self.root.insert(JSON_SUB_URI.into(), Value::Array(sub));
        self.root
            .insert(JSON_METHOD.into(), json!(parts.method.as_str()));

        let mut args = Map::new();
        if let Some(query) = parts.uri.query() {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
                .map_err(|err| HttpError::incorrect(err.to_string()))?;
            for (name, value) in pairs {
                if args.contains_key(&name) {
                    return Err(HttpError::incorrect(format!("Too many values for {name}")));
                }
                args.insert(name, Value::String(value));
            }
        }
        self.root.insert(JSON_URI_ARGS.into(), Value::Object(args));
        Ok(())
    }

    /// Record the headers; a header name appearing with two values is a
    /// malformed request. The `Cookie` header goes through
    /// [`set_cookie_args`](Self::set_cookie_args) instead.
    pub fn set_header_args(&mut self, headers: &HeaderMap) -> Result<(), HttpError> {
        let mut map = Map::new();
        for name in headers.keys() {
            if name == http::header::COOKIE {
                continue;
            }
            let mut values = headers.get_all(name).iter();
            let first = values.next();
            if values.next().is_some() {
                return Err(HttpError::incorrect(format!("Too many values for {name}")));
            }
            if let Some(value) = first {
                let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                map.insert(name.as_str().to_owned(), Value::String(value));
            }
        }
        self.root.insert(JSON_HEADERS.into(), Value::Object(map));
        Ok(())
    }

    /// Record the cookies, leniently decoded.
    pub fn set_cookie_args(&mut self, headers: &HeaderMap) {
        let mut map = Map::new();
        for cookie in cookie::request_cookies(headers) {
            map.insert(cookie.name, Value::String(cookie.value));
        }
        self.root.insert(JSON_COOKIES.into(), Value::Object(map));
    }

    pub fn method(&self) -> Method {
        self.root
            .get(JSON_METHOD)
            .and_then(Value::as_str)
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .unwrap_or(Method::GET)
    }

    pub fn uri(&self) -> &str {
        self.str_item(JSON_URI)
    }

    pub fn base_uri(&self) -> &str {
        self.str_item(JSON_BASE)
    }

    pub fn sub_uri(&self) -> Vec<&str> {
        self.root
            .get(JSON_SUB_URI)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn sub_uri_size(&self) -> usize {
        self.root
            .get(JSON_SUB_URI)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Promote the single sub-URI segment to the `id` query argument.
    pub fn add_id_to_uri_args(&mut self) {
        let id = self.sub_uri().first().map(|s| (*s).to_owned());
        if let Some(id) = id {
            self.uri_args_mut().insert(JSON_ID.into(), Value::String(id));
        }
    }

    fn uri_args_mut(&mut self) -> &mut Map<String, Value> {
        self.tree_mut(JSON_URI_ARGS)
    }

    pub fn uri_arg(&self, name: &str) -> Option<&str> {
        self.root
            .get(JSON_URI_ARGS)
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.uri_arg(JSON_ID)
    }

    /// The `limit` query argument, defaulted and floored to sane values.
    pub fn limit_from_uri(&self) -> usize {
        self.uri_arg(JSON_LIMIT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LIMIT)
    }

    pub fn header_arg(&self, name: &str) -> Option<&str> {
        self.root
            .get(JSON_HEADERS)
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
    }

    pub fn cookie_arg(&self, name: &str) -> Option<&str> {
        self.root
            .get(JSON_COOKIES)
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
    }

    /// All cookie arguments as cookie values.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.root
            .get(JSON_COOKIES)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(name, value)| {
                        value.as_str().map(|v| Cookie::new(name.clone(), v))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_cookie_arg(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.tree_mut(JSON_COOKIES)
            .insert(name.into(), Value::String(value.into()));
    }

    // ===== Body =====

    pub fn body(&self) -> Map<String, Value> {
        self.root
            .get(JSON_BODY)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn body_mut(&mut self) -> &mut Map<String, Value> {
        self.tree_mut(JSON_BODY)
    }

    pub fn set_body_arg(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.body_mut().insert(name.into(), Value::String(value.into()));
    }

    /// Merge a decoded JSON object into the body sub-tree.
    pub fn merge_body(&mut self, node: &Map<String, Value>) {
        let body = self.body_mut();
        for (key, value) in node {
            body.insert(key.clone(), value.clone());
        }
    }

    // ===== Response side =====

    /// Copy the request-identifying sub-trees from the parsed arguments,
    /// so the reply describes what it answers.
    pub fn set_from_argument(&mut self, other: &RestArgument) {
        for key in [JSON_URI, JSON_BASE, JSON_SUB_URI, JSON_URI_ARGS, JSON_METHOD, JSON_COOKIES] {
            if let Some(value) = other.root.get(key) {
                self.root.insert(key.into(), value.clone());
            }
        }
    }

    pub fn answer(&self) -> Option<&Value> {
        self.root.get(JSON_ANSWER)
    }

    /// Set the single-entity answer.
    pub fn set_answer(&mut self, item: Value) {
        self.root.insert(JSON_ANSWER.into(), item);
    }

    /// Put one named item into the answer tree (OPTIONS descriptors).
    pub fn add_item(&mut self, key: impl Into<String>, value: Value) {
        self.tree_mut(JSON_ANSWER).insert(key.into(), value);
    }

    pub fn answer_item(&self, key: &str) -> Option<&Value> {
        self.root.get(JSON_ANSWER).and_then(|v| v.get(key))
    }

    /// Append one entity to the multi-entity results.
    pub fn add_result(&mut self, item: Value) {
        match self
            .root
            .entry(JSON_RESULTS.to_owned())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(array) => array.push(item),
            other => *other = Value::Array(vec![item]),
        }
    }

    pub fn results(&self) -> &[Value] {
        self.root
            .get(JSON_RESULTS)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn add_count_limit(&mut self, count: usize, limit: usize) {
        self.root.insert(JSON_COUNT.into(), json!(count));
        self.root.insert(JSON_LIMIT.into(), json!(limit));
    }

    pub fn add_filter(&mut self, filter: Option<&Value>) {
        if let Some(filter) = filter {
            self.root.insert(JSON_FILTER.into(), filter.clone());
        }
    }

    pub fn set_command(&mut self, command: CommandType) {
        self.root.insert(JSON_COMMAND.into(), json!(command.as_str()));
    }

    pub fn command(&self) -> Option<&str> {
        self.root.get(JSON_COMMAND).and_then(Value::as_str)
    }

    pub fn set_result_status(&mut self, status: StatusCode) {
        self.root.insert(JSON_RESULT.into(), json!(status.as_u16()));
    }

    pub fn result_status(&self) -> Option<u16> {
        self.root
            .get(JSON_RESULT)
            .and_then(Value::as_u64)
            .map(|v| v as u16)
    }

    pub fn set_detail(&mut self, detail: impl Into<String>) {
        self.root.insert(JSON_DETAIL.into(), json!(detail.into()));
    }

    pub fn detail(&self) -> &str {
        self.str_item(JSON_DETAIL)
    }

    pub fn detail_is_empty(&self) -> bool {
        self.detail().is_empty()
    }

    /// Serialize the whole bag as the reply body.
    pub fn to_json(&self) -> Value {
        Value::Object(self.root.clone())
    }

    // ===== Internals =====

    fn str_item(&self, key: &str) -> &str {
        self.root.get(key).and_then(Value::as_str).unwrap_or("")
    }

    fn tree_mut(&mut self, key: &str) -> &mut Map<String, Value> {
        let entry = self
            .root
            .entry(key.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry.as_object_mut().expect("object entry")
    }
}

impl fmt::Display for RestArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Value::Object(self.root.clone()), f)
    }
}

// ===== Test =====
