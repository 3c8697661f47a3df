//! Response assembly shared by both engines.
//!
//! The close decision, `Content-Length`, `Connection`, `Set-Cookie` and
//! `Referer` handling live here so the page and REST engines cannot
//! drift apart on connection lifecycle.
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, REFERER, SET_COOKIE};
use http::{HeaderValue, Response, StatusCode, Version, request};

use crate::codec::FullResponse;
use crate::cookie::{self, Cookie};
use crate::log::warning;

/// Cookies to emit on one response.
///
/// `incoming` must already be filtered through the engine's cookie
/// validity hook; the session cookie is echoed from there when present,
/// minted from the session token otherwise. `extra` carries cookies
/// declared by page fields or REST response arguments.
#[derive(Debug, Default)]
pub struct ResponseCookies {
    pub session_name: String,
    pub session_value: String,
    pub incoming: Vec<Cookie>,
    pub extra: Vec<Cookie>,
}

/// Assembles one [`FullResponse`] from per-request state.
#[derive(Debug)]
pub struct ResponseBuilder<'a> {
    request: Option<&'a request::Parts>,
    status: StatusCode,
    will_close: bool,
    content_type: Option<&'a str>,
    referer: bool,
}

impl<'a> ResponseBuilder<'a> {
    /// `request` is `None` only on very early failures, before any head
    /// was accepted; such responses are HTTP/1.0 and always close.
    pub fn new(request: Option<&'a request::Parts>, status: StatusCode, will_close: bool) -> Self {
        Self { request, status, will_close, content_type: None, referer: true }
    }

    pub fn content_type(mut self, content_type: &'a str) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Suppress the `Referer` echo (bare replies such as 401).
    pub fn no_referer(mut self) -> Self {
        self.referer = false;
        self
    }

    pub fn build(self, body: Option<Bytes>, cookies: &ResponseCookies) -> FullResponse {
        let (version, keep_alive, will_close) = match self.request {
            None => (Version::HTTP_10, false, true),
            Some(parts) => {
                let keep_alive = is_keep_alive(parts);
                let will_close = self.will_close
                    || self.status != StatusCode::OK
                    || has_connection_token(parts, "close")
                    || (parts.version == Version::HTTP_10 && !keep_alive);
                (parts.version, keep_alive && !will_close, will_close)
            }
        };

        let body_bytes = body.unwrap_or_default();
        let body_len = body_bytes.len();
        let mut response = Response::new(body_bytes);
        *response.status_mut() = self.status;
        *response.version_mut() = version;

        let headers = response.headers_mut();
        if body_len > 0 {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
        }
        if keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }
        if let Some(content_type) = self.content_type {
            match HeaderValue::from_str(content_type) {
                Ok(value) => {
                    headers.insert(CONTENT_TYPE, value);
                }
                Err(_err) => warning!("invalid content type {content_type:?}: {_err}"),
            }
        }
        if self.referer {
            if let Some(parts) = self.request {
                let uri = parts.uri.to_string();
                if let Ok(value) = HeaderValue::from_str(&uri) {
                    headers.insert(REFERER, value);
                }
            }
        }

        let mut names = Vec::new();
        for cookie in &cookies.incoming {
            append_cookie(headers, &cookie.name, &cookie.value);
            names.push(cookie.name.as_str());
        }
        if !cookies.session_name.is_empty() && !names.contains(&cookies.session_name.as_str()) {
            append_cookie(headers, &cookies.session_name, &cookies.session_value);
            names.push(cookies.session_name.as_str());
        }
        for cookie in &cookies.extra {
            if !names.contains(&cookie.name.as_str()) {
                append_cookie(headers, &cookie.name, &cookie.value);
            }
        }

        FullResponse { response, close: will_close }
    }
}

fn append_cookie(headers: &mut http::HeaderMap, name: &str, value: &str) {
    match HeaderValue::from_str(&cookie::encode(name, value)) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(_err) => warning!("cookie {name:?} not encodable: {_err}"),
    }
}

/// Keep-alive per HTTP/1.1 rules: on by default for 1.1, opt-in via
/// `Connection: keep-alive` for 1.0.
pub fn is_keep_alive(parts: &request::Parts) -> bool {
    if has_connection_token(parts, "close") {
        return false;
    }
    match parts.version {
        Version::HTTP_10 => has_connection_token(parts, "keep-alive"),
        _ => true,
    }
}

fn has_connection_token(parts: &request::Parts, token: &str) -> bool {
    parts.headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

/// The fixed body of the catastrophic-failure path. Never fails.
pub fn minimal_error_body(status: StatusCode) -> Bytes {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    Bytes::from(format!("<html><body>Error {reason}</body></html>"))
}

// ===== Test =====

#[cfg(test)]
mod test {
    use super::*;

    fn parts(version: Version, connection: Option<&str>) -> request::Parts {
        let mut builder = http::Request::builder()
            .method("GET")
            .uri("/page?x=1")
            .version(version);
        if let Some(connection) = connection {
            builder = builder.header("connection", connection);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn cookies() -> ResponseCookies {
        ResponseCookies {
            session_name: "cookieSession".into(),
            session_value: "Waarpabc".into(),
            ..Default::default()
        }
    }

    #[test]
    fn http11_ok_keeps_alive() {
        let parts = parts(Version::HTTP_11, None);
        let builder = ResponseBuilder::new(Some(&parts), StatusCode::OK, false);
        let full = builder.build(Some(Bytes::from_static(b"hi")), &cookies());
        assert!(!full.close);
        assert_eq!(full.headers().get(CONNECTION).unwrap(), "keep-alive");
        assert_eq!(full.headers().get(CONTENT_LENGTH).unwrap(), "2");
    }

    #[test]
    fn non_ok_closes() {
        let parts = parts(Version::HTTP_11, None);
        let builder = ResponseBuilder::new(Some(&parts), StatusCode::BAD_REQUEST, false);
        let full = builder.build(None, &cookies());
        assert!(full.close);
        assert!(full.headers().get(CONNECTION).is_none());
    }

    #[test]
    fn explicit_close_closes() {
        let parts = parts(Version::HTTP_11, Some("close"));
        let builder = ResponseBuilder::new(Some(&parts), StatusCode::OK, false);
        assert!(builder.build(None, &cookies()).close);
    }

    #[test]
    fn http10_requires_opt_in() {
        let parts1 = parts(Version::HTTP_10, None);
        let builder = ResponseBuilder::new(Some(&parts1), StatusCode::OK, false);
        assert!(builder.build(None, &cookies()).close);

        let parts2 = parts(Version::HTTP_10, Some("keep-alive"));
        let builder = ResponseBuilder::new(Some(&parts2), StatusCode::OK, false);
        let full = builder.build(None, &cookies());
        assert!(!full.close);
        assert_eq!(full.response.version(), Version::HTTP_10);
    }

    #[test]
    fn sticky_will_close() {
        let parts = parts(Version::HTTP_11, None);
        let builder = ResponseBuilder::new(Some(&parts), StatusCode::OK, true);
        assert!(builder.build(None, &cookies()).close);
    }

    #[test]
    fn no_request_is_http10_close() {
        let builder = ResponseBuilder::new(None, StatusCode::INTERNAL_SERVER_ERROR, false);
        let full = builder.build(Some(minimal_error_body(StatusCode::INTERNAL_SERVER_ERROR)), &cookies());
        assert!(full.close);
        assert_eq!(full.response.version(), Version::HTTP_10);
    }

    #[test]
    fn session_cookie_minted_when_absent() {
        let parts = parts(Version::HTTP_11, None);
        let builder = ResponseBuilder::new(Some(&parts), StatusCode::OK, false);
        let full = builder.build(None, &cookies());
        let set: Vec<_> = full.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0], "cookieSession=Waarpabc");
    }

    #[test]
    fn session_cookie_echoed_when_valid() {
        let parts = parts(Version::HTTP_11, None);
        let builder = ResponseBuilder::new(Some(&parts), StatusCode::OK, false);
        let mut jar = cookies();
        jar.incoming.push(Cookie::new("cookieSession", "Waarpxyz"));
        let full = builder.build(None, &jar);
        let set: Vec<_> = full.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0], "cookieSession=Waarpxyz");
    }

    #[test]
    fn referer_echoes_request_uri() {
        let parts = parts(Version::HTTP_11, None);
        let builder = ResponseBuilder::new(Some(&parts), StatusCode::OK, false);
        let full = builder.build(None, &cookies());
        assert_eq!(full.headers().get(REFERER).unwrap(), "/page?x=1");
    }
}
