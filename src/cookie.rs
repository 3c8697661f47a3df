//! Lenient server-side cookie codec.
//!
//! Decoding is deliberately forgiving: malformed pairs are skipped rather
//! than failing the request, surrounding whitespace and double quotes are
//! stripped, and a pair without `=` is kept with an empty value.
use http::HeaderMap;
use http::header::COOKIE;

/// A single request cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Decode one `Cookie` header value.
pub fn decode(header: &str) -> Vec<Cookie> {
    let mut cookies = Vec::new();
    for pair in header.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = match pair.split_once('=') {
            Some((name, value)) => (name.trim(), unquote(value.trim())),
            None => (pair, ""),
        };
        if name.is_empty() {
            continue;
        }
        cookies.push(Cookie::new(name, value));
    }
    cookies
}

/// Collect cookies from every `Cookie` header of a request.
pub fn request_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    let mut cookies = Vec::new();
    for value in headers.get_all(COOKIE) {
        if let Ok(value) = value.to_str() {
            cookies.extend(decode(value));
        }
    }
    cookies
}

/// Encode one cookie as a `Set-Cookie` header value.
pub fn encode(name: &str, value: &str) -> String {
    let mut out = String::with_capacity(name.len() + value.len() + 1);
    out.push_str(name);
    out.push('=');
    if value.contains(|c: char| c == ' ' || c == ',' || c == ';') {
        out.push('"');
        out.push_str(value);
        out.push('"');
    } else {
        out.push_str(value);
    }
    out
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

// ===== Test =====
