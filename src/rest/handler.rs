//! Method handlers and their registry.
use bytes::Bytes;
use http::{Method, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::HttpError;
use crate::multipart::FileUpload;
use crate::session::Session;

use super::argument::RestArgument;
use super::root::RootOptionsHandler;

/// Command tag carried by every REST reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    MultiGet,
    Get,
    Create,
    Update,
    Delete,
    Options,
}

impl CommandType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MultiGet => "MULTIGET",
            Self::Get => "GET",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

/// Canonical ordering of methods in aggregated `Allow` headers.
pub(crate) const METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::HEAD,
    Method::PATCH,
    Method::TRACE,
    Method::CONNECT,
];

/// A REST method handler bound to one base URI.
///
/// The handler is stateless with respect to the connection; all mutable
/// request state lives in the engine and is passed in.
pub trait RestHandler: Send + Sync {
    /// Base URI segment this handler answers, without slashes.
    fn path(&self) -> &str;

    /// Methods this handler accepts.
    fn methods(&self) -> &[Method];

    fn is_method_included(&self, method: &Method) -> bool {
        self.methods().contains(method)
    }

    /// Whether the body is a JSON document to cumulate and parse, as
    /// opposed to form data fed to the multipart decoder.
    fn body_json_decoded(&self) -> bool {
        false
    }

    /// Whether the handler requires an identified principal. Enforced
    /// during handler selection: an unidentified session is refused
    /// with 401 before the session-correctness check runs.
    fn need_auth(&self) -> bool {
        true
    }

    /// Validate the method/URI-arity combination and authorization before
    /// any body is read.
    fn check_handler_session(
        &self,
        session: &Session,
        args: &mut RestArgument,
        resp: &mut RestArgument,
    ) -> Result<(), HttpError>;

    /// Sink for one completed file upload.
    fn file_upload(
        &self,
        upload: FileUpload,
        args: &mut RestArgument,
        resp: &mut RestArgument,
    ) -> Result<(), HttpError> {
        let _ = (upload, args, resp);
        Err(HttpError::incorrect("File upload not allowed"))
    }

    /// Parse the cumulated body. The default decodes JSON, merges an
    /// object body into the argument bag, and reports a parse failure in
    /// `detail` rather than failing the request.
    fn body(
        &self,
        data: &Bytes,
        args: &mut RestArgument,
        resp: &mut RestArgument,
    ) -> Result<Option<Value>, HttpError> {
        match serde_json::from_slice::<Value>(data) {
            Ok(Value::Object(map)) => {
                args.merge_body(&map);
                Ok(Some(Value::Object(map)))
            }
            Ok(other) => Ok(Some(other)),
            Err(_err) => {
                resp.set_detail("ERROR: JSON body cannot be parsed");
                Ok(None)
            }
        }
    }

    /// Run the operation once the whole request was parsed.
    fn end_parsing_request(
        &self,
        session: &mut Session,
        args: &mut RestArgument,
        resp: &mut RestArgument,
        body: Option<&Value>,
    ) -> Result<(), HttpError>;

    /// Fill the reply for an OPTIONS request on this handler.
    fn options_command(
        &self,
        config: &RestConfiguration,
        args: &RestArgument,
        resp: &mut RestArgument,
    ) {
        let _ = (config, args);
        let allow = self
            .methods()
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(",");
        resp.add_item(http::header::ALLOW.as_str(), Value::String(allow));
        resp.add_item(super::argument::X_DETAILED_ALLOW, self.detailed_allow());
        resp.set_command(CommandType::Options);
    }

    /// Per-method description of this handler's surface.
    fn detailed_allow(&self) -> Value;

    /// Map a caught error, possibly enriching the reply. The returned
    /// status wins over the default mapping.
    fn handle_exception(
        &self,
        err: &HttpError,
        args: &mut RestArgument,
        resp: &mut RestArgument,
    ) -> StatusCode {
        let _ = (args, resp);
        err.status()
    }
}

// ===== Configuration =====

/// The REST engine's registry: base URIs mapped to handlers, plus the
/// root OPTIONS handler answering `/`. Immutable after build.
pub struct RestConfiguration {
    handlers: BTreeMap<String, Arc<dyn RestHandler>>,
    root: Arc<dyn RestHandler>,
}

impl RestConfiguration {
    pub fn builder() -> RestConfigurationBuilder {
        RestConfigurationBuilder { handlers: BTreeMap::new() }
    }

    pub fn handler(&self, base: &str) -> Option<&Arc<dyn RestHandler>> {
        self.handlers.get(base)
    }

    pub fn root_handler(&self) -> Arc<dyn RestHandler> {
        Arc::clone(&self.root)
    }

    /// Registered handlers in path order.
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn RestHandler>> {
        self.handlers.values()
    }

    /// Union of the registered handlers' methods, in canonical order.
    pub fn allowed_methods(&self) -> Vec<Method> {
        let mut allowed = Vec::new();
        for method in &METHODS {
            if self.handlers.values().any(|h| h.is_method_included(method)) {
                allowed.push(method.clone());
            }
        }
        allowed
    }
}

impl fmt::Debug for RestConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestConfiguration")
            .field("paths", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`RestConfiguration`].
pub struct RestConfigurationBuilder {
    handlers: BTreeMap<String, Arc<dyn RestHandler>>,
}

impl RestConfigurationBuilder {
    /// Register a handler under its base path.
    pub fn handler(mut self, handler: Arc<dyn RestHandler>) -> Self {
        let base = handler.path().trim_matches('/').to_owned();
        self.handlers.insert(base, handler);
        self
    }

    pub fn build(self) -> Arc<RestConfiguration> {
        Arc::new(RestConfiguration {
            handlers: self.handlers,
            root: Arc::new(RootOptionsHandler),
        })
    }
}

impl fmt::Debug for RestConfigurationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestConfigurationBuilder").finish_non_exhaustive()
    }
}
