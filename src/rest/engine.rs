//! Per-connection state machine of the REST engine.
use bytes::{Bytes, BytesMut};
use http::header::ALLOW;
use http::{HeaderName, HeaderValue, Method, StatusCode, request};
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::codec::{Action, BodyChunk, HttpMessage, RequestHead};
use crate::config::GatewayConfig;
use crate::cookie::{self, Cookie};
use crate::error::HttpError;
use crate::log::{debug, warning};
use crate::multipart::{HttpData, PostDecoder, TempFileFactory};
use crate::response::{ResponseBuilder, ResponseCookies, minimal_error_body};
use crate::session::Session;

use super::argument::{RestArgument, X_ALLOW_URIS, X_DETAILED_ALLOW};
use super::handler::{RestConfiguration, RestHandler};

/// Application hooks for the REST engine: connection-level checks that do
/// not belong to any single handler.
pub trait RestHooks: Send + Sync {
    /// Check correctness of the connection before handler lookup; the
    /// arguments already carry method, URI, headers and cookies.
    fn check_connection(&self, session: &mut Session, args: &RestArgument) -> Result<(), HttpError> {
        let _ = (session, args);
        Ok(())
    }

    /// Whether an incoming cookie may be echoed on the response.
    fn is_cookie_valid(&self, cookie: &Cookie) -> bool {
        let _ = cookie;
        true
    }
}

/// Hooks accepting every connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRestHooks;

impl RestHooks for DefaultRestHooks {}

/// The per-connection protocol engine for REST method handlers.
pub struct RestEngine<H> {
    config: Arc<RestConfiguration>,
    gateway: GatewayConfig,
    factory: TempFileFactory,
    hooks: H,
    session: Session,
    // request context
    request: Option<request::Parts>,
    handler: Option<Arc<dyn RestHandler>>,
    decoder: Option<PostDecoder>,
    cumulative: Option<BytesMut>,
    json: Option<Value>,
    args: RestArgument,
    resp: RestArgument,
    status: StatusCode,
    will_close: bool,
    closed: bool,
}

impl<H: RestHooks> RestEngine<H> {
    pub fn activate(
        config: Arc<RestConfiguration>,
        gateway: GatewayConfig,
        factory: TempFileFactory,
        hooks: H,
        remote: SocketAddr,
    ) -> Self {
        let _ = remote;
        Self {
            config,
            gateway,
            factory,
            hooks,
            session: Session::new(),
            request: None,
            handler: None,
            decoder: None,
            cumulative: None,
            json: None,
            args: RestArgument::new(),
            resp: RestArgument::new(),
            status: StatusCode::OK,
            will_close: false,
            closed: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle one message from the codec.
    pub fn recv(&mut self, msg: HttpMessage) -> Vec<Action> {
        if self.closed {
            return Vec::new();
        }
        debug!("msg received");
        let mut actions = Vec::new();
        let result = match msg {
            HttpMessage::Head(head) => self.on_head(head, &mut actions),
            HttpMessage::Chunk(chunk) => self.on_chunk(chunk, &mut actions),
        };
        if let Err(err) = result {
            self.on_error(err, &mut actions);
        }
        if actions.iter().any(Action::is_closing) {
            self.closed = true;
        }
        actions
    }

    /// Connection inactivation; releases the request context.
    pub fn inactivate(&mut self) {
        self.clean();
        self.closed = true;
    }

    // ===== Request lifecycle =====

    fn initialize(&mut self) {
        self.clean();
        self.request = None;
        self.status = StatusCode::OK;
        self.will_close = false;
        self.args = RestArgument::new();
        self.resp = RestArgument::new();
    }

    fn clean(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.cleanup();
        }
        self.handler = None;
        self.cumulative = None;
        self.json = None;
        self.session.clean_transient();
    }

    fn on_head(&mut self, head: RequestHead, actions: &mut Vec<Action>) -> Result<(), HttpError> {
        self.initialize();
        let RequestHead { parts, body } = head;
        self.request = Some(parts);
        let parts = self.request.as_ref().expect("request just stored");
        self.args.set_request(parts)?;
        self.args.set_header_args(&parts.headers)?;
        self.args.set_cookie_args(&parts.headers);

        self.hooks.check_connection(&mut self.session, &self.args)?;
        let handler = self.get_handler()?;
        self.handler = Some(Arc::clone(&handler));

        if self.args.method() == Method::OPTIONS {
            self.resp.set_from_argument(&self.args);
            handler.options_command(&self.config, &self.args, &mut self.resp);
            self.finalize_send(actions);
            return Ok(());
        }

        if let Some(body) = body {
            // the codec aggregated the whole request
            if handler.body_json_decoded() {
                self.json = self.body_json(&handler, &body)?;
            } else {
                self.create_decoder()?;
                let decoder = self.decoder.as_mut().expect("decoder just created");
                decoder.offer_last(&body)?;
                self.read_chunk_by_chunk()?;
            }
            self.resp.set_from_argument(&self.args);
            self.end_parsing()?;
            self.finalize_send(actions);
            return Ok(());
        }

        // streaming body follows
        if !handler.body_json_decoded() {
            self.create_decoder()?;
        }
        Ok(())
    }

    fn on_chunk(&mut self, chunk: BodyChunk, actions: &mut Vec<Action>) -> Result<(), HttpError> {
        let Some(handler) = self.handler.clone() else {
            warning!("body chunk with no handler in flight");
            return Ok(());
        };
        if handler.body_json_decoded() {
            self.cumulative
                .get_or_insert_with(BytesMut::new)
                .extend_from_slice(&chunk.data);
        } else {
            let decoder = self
                .decoder
                .as_mut()
                .ok_or_else(|| HttpError::internal("no decoder in flight"))?;
            if chunk.last {
                decoder.offer_last(&chunk.data)?;
            } else {
                decoder.offer(&chunk.data)?;
            }
            self.read_chunk_by_chunk()?;
        }
        if chunk.last {
            if handler.body_json_decoded() {
                let data = self
                    .cumulative
                    .take()
                    .map(BytesMut::freeze)
                    .unwrap_or_default();
                self.json = self.body_json(&handler, &data)?;
            }
            self.resp.set_from_argument(&self.args);
            self.end_parsing()?;
            self.finalize_send(actions);
        }
        Ok(())
    }

    // ===== Dispatch =====

    /// Select the handler for the parsed arguments. OPTIONS on an unbound
    /// URI falls back to the root handler; anything else unbound is a
    /// 405. A handler requiring authentication refuses an unidentified
    /// principal before its session-correctness check runs.
    fn get_handler(&mut self) -> Result<Arc<dyn RestHandler>, HttpError> {
        let method = self.args.method();
        let base = self.args.base_uri().to_owned();
        let selected = match self.config.handler(&base).cloned() {
            Some(handler) => Some(handler),
            None if method == Method::OPTIONS => Some(self.config.root_handler()),
            None => None,
        };
        let Some(handler) = selected else {
            return Err(HttpError::method_not_allowed(format!(
                "No Method found for that URI: /{base}"
            )));
        };
        if handler.need_auth() && !self.session.auth().is_identified() {
            return Err(HttpError::invalid_auth("Invalid authentication"));
        }
        handler.check_handler_session(&self.session, &mut self.args, &mut self.resp)?;
        if !handler.is_method_included(&method) {
            return Err(HttpError::method_not_allowed(format!(
                "No Method found for that URI: /{base}"
            )));
        }
        Ok(handler)
    }

    fn create_decoder(&mut self) -> Result<(), HttpError> {
        let parts = self
            .request
            .as_ref()
            .ok_or_else(|| HttpError::internal("no request head"))?;
        self.decoder = Some(PostDecoder::new(parts, self.factory.clone())?);
        Ok(())
    }

    fn body_json(
        &mut self,
        handler: &Arc<dyn RestHandler>,
        data: &Bytes,
    ) -> Result<Option<Value>, HttpError> {
        if data.is_empty() {
            return Ok(None);
        }
        handler.body(data, &mut self.args, &mut self.resp)
    }

    fn read_chunk_by_chunk(&mut self) -> Result<(), HttpError> {
        loop {
            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(());
            };
            let Some(data) = decoder.next() else {
                return Ok(());
            };
            self.read_http_data(data)?;
        }
    }

    fn read_http_data(&mut self, data: HttpData) -> Result<(), HttpError> {
        match data {
            HttpData::Attribute { name, value } => {
                self.args.set_body_arg(name, value);
                Ok(())
            }
            HttpData::Upload(upload) => {
                if !upload.is_completed() {
                    warning!("file {} still pending but should not", upload.name());
                    return Err(HttpError::internal("File still pending but should not"));
                }
                let handler = self
                    .handler
                    .clone()
                    .ok_or_else(|| HttpError::internal("no handler in flight"))?;
                handler.file_upload(upload, &mut self.args, &mut self.resp)
            }
        }
    }

    fn end_parsing(&mut self) -> Result<(), HttpError> {
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| HttpError::internal("no handler in flight"))?;
        let json = self.json.take();
        handler.end_parsing_request(&mut self.session, &mut self.args, &mut self.resp, json.as_ref())
    }

    // ===== Responses =====

    fn on_error(&mut self, err: HttpError, actions: &mut Vec<Action>) {
        warning!("request failed: {err}");
        let mapped = match self.handler.clone() {
            Some(handler) => handler.handle_exception(&err, &mut self.args, &mut self.resp),
            None => err.status(),
        };
        if self.status == StatusCode::OK {
            self.status = if mapped == StatusCode::OK { err.status() } else { mapped };
        }
        if self.resp.detail_is_empty() {
            self.resp.set_detail(err.message());
        }
        if self.handler.is_some() || self.request.is_some() {
            self.resp.set_result_status(self.status);
            self.finalize_send(actions);
        } else {
            self.force_closing(actions);
        }
    }

    fn response_cookies(&self) -> ResponseCookies {
        let incoming = match &self.request {
            Some(parts) => cookie::request_cookies(&parts.headers)
                .into_iter()
                .filter(|c| self.hooks.is_cookie_valid(c))
                .collect(),
            None => Vec::new(),
        };
        ResponseCookies {
            session_name: self.gateway.session_cookie_name.clone(),
            session_value: self.session.cookie_session().to_owned(),
            incoming,
            extra: Vec::new(),
        }
    }

    /// Serialize the response argument, emit it, and clean the request
    /// context.
    fn finalize_send(&mut self, actions: &mut Vec<Action>) {
        let is_options = self.args.method() == Method::OPTIONS;
        if self.resp.result_status().is_none() {
            self.resp.set_result_status(self.status);
        }
        let body = Bytes::from(self.resp.to_json().to_string());
        let mut builder = ResponseBuilder::new(self.request.as_ref(), self.status, self.will_close);
        if self.status == StatusCode::UNAUTHORIZED {
            // bare reply, like the data-model handlers emit for 401
            builder = builder.no_referer();
        } else {
            builder = builder.content_type("application/json");
        }
        let mut full = builder.build(Some(body), &self.response_cookies());
        if is_options {
            let headers = full.response.headers_mut();
            if let Some(allow) = self.resp.answer_item(ALLOW.as_str()).and_then(Value::as_str) {
                if let Ok(value) = HeaderValue::from_str(allow) {
                    headers.insert(ALLOW, value);
                }
            }
            if let Some(uris) = self.resp.answer_item(X_ALLOW_URIS).and_then(Value::as_str) {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(X_ALLOW_URIS.as_bytes()),
                    HeaderValue::from_str(uris),
                ) {
                    headers.insert(name, value);
                }
            }
            if let Some(detailed) = self.resp.answer_item(X_DETAILED_ALLOW) {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(X_DETAILED_ALLOW.as_bytes()),
                    HeaderValue::from_str(&detailed.to_string()),
                ) {
                    headers.insert(name, value);
                }
            }
        }
        self.will_close = full.close;
        actions.push(Action::Respond(full));
        self.clean();
        debug!("cleaned");
    }

    /// Last-resort answer; never fails.
    fn force_closing(&mut self, actions: &mut Vec<Action>) {
        if self.status == StatusCode::OK {
            self.status = StatusCode::INTERNAL_SERVER_ERROR;
        }
        self.will_close = true;
        debug!("will close");
        let body = minimal_error_body(self.status);
        let full = ResponseBuilder::new(self.request.as_ref(), self.status, true)
            .content_type("text/html")
            .build(Some(body), &self.response_cookies());
        actions.push(Action::Respond(full));
        self.clean();
    }
}

impl<H> fmt::Debug for RestEngine<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestEngine")
            .field("status", &self.status)
            .field("will_close", &self.will_close)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
