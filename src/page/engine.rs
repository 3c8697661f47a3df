//! Per-connection state machine of the page engine.
use bytes::Bytes;
use http::{Method, StatusCode, request};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::codec::{Action, BodyChunk, HttpMessage, RequestHead};
use crate::config::GatewayConfig;
use crate::cookie;
use crate::error::HttpError;
use crate::log::{debug, info, warning};
use crate::multipart::{HttpData, PostDecoder, TempFileFactory};
use crate::response::{ResponseBuilder, ResponseCookies, minimal_error_body};
use crate::session::Session;

use super::field::{FieldPosition, FieldRole};
use super::hooks::PageHooks;
use super::page::{BusinessRequest, Page, PageRole};
use super::registry::PageRegistry;

/// The per-connection protocol engine for declarative pages.
///
/// Created on connection activation, fed [`HttpMessage`]s in order, and
/// torn down with [`inactivate`](PageEngine::inactivate). Each message
/// yields the actions the codec must write before the next message is
/// delivered.
pub struct PageEngine<H> {
    config: GatewayConfig,
    registry: Arc<PageRegistry>,
    factory: TempFileFactory,
    hooks: H,
    remote: SocketAddr,
    session: Session,
    // request context, rebuilt by initialize() and torn down by clean()
    request: Option<request::Parts>,
    page: Option<Arc<Page>>,
    business: Option<BusinessRequest>,
    decoder: Option<PostDecoder>,
    status: StatusCode,
    error_message: Option<String>,
    will_close: bool,
    closed: bool,
}

impl<H: PageHooks> PageEngine<H> {
    /// Connection activation: a fresh session with a minted cookie token
    /// and the Html command role.
    pub fn activate(
        config: GatewayConfig,
        registry: Arc<PageRegistry>,
        factory: TempFileFactory,
        hooks: H,
        remote: SocketAddr,
    ) -> Self {
        Self {
            config,
            registry,
            factory,
            hooks,
            remote,
            session: Session::new(),
            request: None,
            page: None,
            business: None,
            decoder: None,
            status: StatusCode::OK,
            error_message: None,
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
        let mut actions = Vec::new();
        let result = match msg {
            HttpMessage::Head(head) => self.on_head(head, &mut actions),
            HttpMessage::Chunk(chunk) => self.on_chunk(chunk, &mut actions),
        };
        if let Err(err) = result {
            if self.status == StatusCode::OK {
                self.status = err.status();
            }
            self.error_message = Some(err.message().to_owned());
            warning!("request failed: {err}");
            self.write_error_page(&mut actions);
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

    /// Called at the beginning of every new request.
    fn initialize(&mut self) {
        // clean any previous upload state first
        self.clean();
        self.will_close = false;
        self.status = StatusCode::OK;
        self.error_message = None;
    }

    /// Tear down the request context; safe to call repeatedly. Dropping
    /// the business request and the decoder releases their temp files.
    fn clean(&mut self) {
        self.business = None;
        if let Some(mut decoder) = self.decoder.take() {
            decoder.cleanup();
        }
        self.page = None;
        self.session.clean_transient();
    }

    fn on_head(&mut self, head: RequestHead, actions: &mut Vec<Action>) -> Result<(), HttpError> {
        self.initialize();
        let RequestHead { parts, body } = head;
        let path = parts.uri.path().to_owned();
        let method = parts.method.clone();
        self.request = Some(parts);

        let page = match self.registry.get(&path, &method)? {
            Some(page) => Arc::clone(page),
            None => {
                if method == Method::GET {
                    // unbound GET: delegate to the static file server
                    debug!("simple get: {path}");
                    actions.push(Action::ServeStatic {
                        path: format!("{}{}", self.config.base_static_path, path),
                    });
                    return Ok(());
                }
                return Err(HttpError::not_found(format!("No page for {path}")));
            }
        };

        self.session.set_current_command(page.role());
        info!("request received: {}", page.name());

        if page.role() == PageRole::Error {
            self.status = StatusCode::BAD_REQUEST;
            self.hooks.error(&mut self.session);
            self.clean();
            // order matters: clean first, then the fresh business request
            self.business = Some(page.new_request(self.remote));
            self.page = Some(page);
            self.will_close = true;
            self.write_simple_page(actions)?;
            return Ok(());
        }

        self.business = Some(page.new_request(self.remote));
        self.page = Some(page);
        self.uri_args()?;
        self.header_args()?;
        self.cookie_args()?;
        self.hooks.check_connection(&mut self.session)?;

        match self.current_role() {
            PageRole::Delete => {
                // no body element
                self.final_data()?;
                self.write_simple_page(actions)?;
                self.clean();
                Ok(())
            }
            PageRole::GetDownload => {
                // no body element; the file helper writes the answer and
                // the context is cleaned on the next request
                let path = self.final_data()?;
                let path = path.ok_or_else(|| HttpError::internal("download without a file"))?;
                actions.push(Action::ServeFile { path });
                Ok(())
            }
            PageRole::Html | PageRole::Menu => {
                let business = self
                    .business
                    .as_mut()
                    .ok_or_else(|| HttpError::internal("no business request"))?;
                self.hooks.before_simple_page(&mut self.session, business)?;
                self.write_simple_page(actions)?;
                Ok(())
            }
            PageRole::Post | PageRole::PostUpload | PageRole::Put => self.post(body, actions),
            PageRole::Error => Err(HttpError::incorrect("Unknown request")),
        }
    }

    /// Body handling for Post, PostUpload and Put pages.
    fn post(&mut self, body: Option<Bytes>, actions: &mut Vec<Action>) -> Result<(), HttpError> {
        let parts = self
            .request
            .as_ref()
            .ok_or_else(|| HttpError::internal("no request head"))?;
        self.decoder = Some(PostDecoder::new(parts, self.factory.clone())?);

        if let Some(body) = body {
            // the codec aggregated the whole request
            let decoder = self.decoder.as_mut().expect("decoder just created");
            decoder.offer_last(&body)?;
            self.read_chunk_by_chunk()?;
            self.final_data()?;
            self.write_simple_page(actions)?;
            self.clean();
        }
        Ok(())
    }

    fn on_chunk(&mut self, chunk: BodyChunk, actions: &mut Vec<Action>) -> Result<(), HttpError> {
        let Some(decoder) = self.decoder.as_mut() else {
            warning!("body chunk with no decoder in flight");
            return Ok(());
        };
        if chunk.last {
            decoder.offer_last(&chunk.data)?;
        } else {
            decoder.offer(&chunk.data)?;
        }
        self.read_chunk_by_chunk()?;
        if chunk.last {
            self.final_data()?;
            self.write_simple_page(actions)?;
            self.clean();
        }
        Ok(())
    }

    // ===== Extraction =====

    /// Values from the URI query. A parameter with more than one value is
    /// a malformed request.
    fn uri_args(&mut self) -> Result<(), HttpError> {
        let Some(parts) = &self.request else {
            return Ok(());
        };
        let Some(query) = parts.uri.query() else {
            return Ok(());
        };
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|err| HttpError::incorrect(err.to_string()))?;
        let Some(business) = self.business.as_mut() else {
            return Ok(());
        };
        let mut seen = Vec::new();
        for (name, value) in pairs {
            if seen.contains(&name) {
                return Err(HttpError::incorrect(format!("Too many values for {name}")));
            }
            business.set_value(&name, &value, FieldPosition::Url)?;
            seen.push(name);
        }
        Ok(())
    }

    /// Values from the headers, case-insensitively; duplicated header
    /// names are rejected like duplicated query parameters.
    fn header_args(&mut self) -> Result<(), HttpError> {
        let Some(parts) = &self.request else {
            return Ok(());
        };
        let Some(business) = self.business.as_mut() else {
            return Ok(());
        };
        for name in parts.headers.keys() {
            let mut values = parts.headers.get_all(name).iter();
            let first = values.next();
            if values.next().is_some() {
                return Err(HttpError::incorrect(format!("Too many values for {name}")));
            }
            if let Some(value) = first {
                let value = String::from_utf8_lossy(value.as_bytes());
                business.set_value(name.as_str(), &value, FieldPosition::Header)?;
            }
        }
        Ok(())
    }

    /// Values from cookies, leniently decoded and filtered through the
    /// validity hook.
    fn cookie_args(&mut self) -> Result<(), HttpError> {
        let Some(parts) = &self.request else {
            return Ok(());
        };
        let cookies = cookie::request_cookies(&parts.headers);
        let Some(business) = self.business.as_mut() else {
            return Ok(());
        };
        for cookie in cookies {
            if self.hooks.is_cookie_valid(&cookie) {
                business.set_value(&cookie.name, &cookie.value, FieldPosition::Cookie)?;
            }
        }
        Ok(())
    }

    // ===== Body data =====

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
        let business = self
            .business
            .as_mut()
            .ok_or_else(|| HttpError::internal("no business request"))?;
        match data {
            HttpData::Attribute { name, value } => {
                business.set_value(&name, &value, FieldPosition::Body)?;
            }
            HttpData::Upload(upload) => {
                if !upload.is_completed() {
                    warning!("file {} still pending but should not", upload.name());
                    return Err(HttpError::internal("incomplete file upload"));
                }
                let role = business.page().field(upload.name()).map(|f| f.role());
                match role {
                    Some(FieldRole::InputFile) => business.set_file_upload(upload),
                    _ => {
                        warning!("file received but no field for it: {}", upload.name());
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate and run the final business step once all data arrived.
    /// Returns the download path for GetDownload pages.
    fn final_data(&mut self) -> Result<Option<String>, HttpError> {
        let business = self
            .business
            .as_mut()
            .ok_or_else(|| HttpError::internal("no business request"))?;
        self.hooks
            .valid_request_after_all_data(&mut self.session, business)?;
        if !business.is_valid() {
            return Err(HttpError::incorrect("Invalid request"));
        }
        match business.page().role() {
            PageRole::Delete => {
                let filename = self.hooks.filename(&self.session);
                self.session.set_filename(filename);
                self.hooks.final_delete(&mut self.session, business)?;
                info!("delete ok");
                Ok(None)
            }
            PageRole::GetDownload => {
                let path = self.hooks.final_get(&mut self.session, business)?;
                info!("download ok");
                Ok(Some(path))
            }
            PageRole::Post => {
                self.hooks.final_post(&mut self.session, business)?;
                info!("post ok");
                Ok(None)
            }
            PageRole::PostUpload => {
                self.hooks.final_post_upload(&mut self.session, business)?;
                info!("post upload ok");
                Ok(None)
            }
            PageRole::Put => {
                self.hooks.final_put(&mut self.session, business)?;
                info!("put ok");
                Ok(None)
            }
            _ => Err(HttpError::incorrect("Unknown request")),
        }
    }

    // ===== Responses =====

    fn current_role(&self) -> PageRole {
        self.page
            .as_ref()
            .map(|page| page.role())
            .unwrap_or(PageRole::Error)
    }

    fn response_cookies(&self, extra: Vec<cookie::Cookie>) -> ResponseCookies {
        let incoming = match &self.request {
            Some(parts) => cookie::request_cookies(&parts.headers)
                .into_iter()
                .filter(|c| self.hooks.is_cookie_valid(c))
                .collect(),
            None => Vec::new(),
        };
        ResponseCookies {
            session_name: self.config.session_cookie_name.clone(),
            session_value: self.session.cookie_session().to_owned(),
            incoming,
            extra,
        }
    }

    /// Render the current page and emit the response.
    fn write_simple_page(&mut self, actions: &mut Vec<Action>) -> Result<(), HttpError> {
        if self.current_role() == PageRole::Error {
            if let (Some(business), Some(message)) =
                (self.business.as_mut(), self.error_message.as_deref())
            {
                business.set_error_info(message);
            }
        }
        let business = self
            .business
            .as_ref()
            .ok_or_else(|| HttpError::internal("no business request"))?;
        debug!("write page {}", business.page().name());
        let html = business.render();
        let cookies = self.response_cookies(business.cookie_set_fields());
        let full = ResponseBuilder::new(self.request.as_ref(), self.status, self.will_close)
            .content_type(business.content_type())
            .build(Some(Bytes::from(html)), &cookies);
        self.will_close = full.close;
        actions.push(Action::Respond(full));
        Ok(())
    }

    /// Error rendering: the error hook runs, the context is cleaned, and
    /// the canonical error page for the status is written. Falls back to
    /// [`force_closing`](Self::force_closing) when no error page matches
    /// or the page itself fails.
    fn write_error_page(&mut self, actions: &mut Vec<Action>) {
        self.hooks.error(&mut self.session);
        self.clean();
        self.will_close = true;
        if !self.set_error_page() {
            self.force_closing(actions);
            return;
        }
        if self.write_simple_page(actions).is_err() {
            self.force_closing(actions);
        }
    }

    fn set_error_page(&mut self) -> bool {
        let Some(page) = self.registry.error_page(self.status.as_u16()) else {
            return false;
        };
        let page = Arc::clone(page);
        self.business = Some(page.new_request(self.remote));
        self.page = Some(page);
        true
    }

    /// Last-resort answer; this path never fails.
    fn force_closing(&mut self, actions: &mut Vec<Action>) {
        if self.status == StatusCode::OK {
            self.status = StatusCode::INTERNAL_SERVER_ERROR;
        }
        self.will_close = true;
        debug!("will close");
        let body = minimal_error_body(self.status);
        let full = ResponseBuilder::new(self.request.as_ref(), self.status, true)
            .content_type("text/html")
            .build(Some(body), &self.response_cookies(Vec::new()));
        actions.push(Action::Respond(full));
    }
}

impl<H> fmt::Debug for PageEngine<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageEngine")
            .field("status", &self.status)
            .field("will_close", &self.will_close)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
