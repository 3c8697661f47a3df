//! Page definitions and the per-request business value bag.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use http::Method;

use crate::cookie::Cookie;
use crate::error::HttpError;
use crate::log::trace;
use crate::multipart::FileUpload;

use super::field::{ERROR_INFO, FieldDef, FieldPosition, FieldRole};

/// Control-flow role of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRole {
    Html,
    Menu,
    GetDownload,
    Post,
    PostUpload,
    Put,
    Delete,
    Error,
}

impl PageRole {
    /// HTTP method this role is served under; error pages are not routed.
    pub fn method(self) -> Option<Method> {
        match self {
            Self::Html | Self::Menu | Self::GetDownload => Some(Method::GET),
            Self::Post | Self::PostUpload => Some(Method::POST),
            Self::Put => Some(Method::PUT),
            Self::Delete => Some(Method::DELETE),
            Self::Error => None,
        }
    }
}

/// A declarative binding of a URI to a set of typed fields and a render
/// template.
///
/// The template is plain text with `${name}` placeholders, substituted
/// from field values at render time.
#[derive(Debug)]
pub struct Page {
    name: String,
    uri: String,
    role: PageRole,
    content_type: String,
    template: String,
    fields: Vec<FieldDef>,
}

impl Page {
    pub fn builder(name: impl Into<String>, uri: impl Into<String>, role: PageRole) -> PageBuilder {
        PageBuilder {
            page: Page {
                name: name.into(),
                uri: uri.into(),
                role,
                content_type: "text/html; charset=utf-8".into(),
                template: String::new(),
                fields: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn role(&self) -> PageRole {
        self.role
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// New value bag for one request against this page, with defaults
    /// applied.
    pub fn new_request(self: &Arc<Self>, remote: SocketAddr) -> BusinessRequest {
        let mut values = HashMap::new();
        for field in &self.fields {
            if let Some(default) = field.default() {
                values.insert(field.name().to_owned(), default.to_owned());
            }
        }
        BusinessRequest {
            page: Arc::clone(self),
            remote,
            values,
            uploads: HashMap::new(),
        }
    }
}

/// Builder for [`Page`].
#[derive(Debug)]
pub struct PageBuilder {
    page: Page,
}

impl PageBuilder {
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.page.content_type = content_type.into();
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.page.template = template.into();
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.page.fields.push(field);
        self
    }

    pub fn build(self) -> Arc<Page> {
        Arc::new(self.page)
    }
}

/// The per-request object built from a page: holds extracted field values
/// and completed uploads, and renders the response body.
#[derive(Debug)]
pub struct BusinessRequest {
    page: Arc<Page>,
    remote: SocketAddr,
    values: HashMap<String, String>,
    uploads: HashMap<String, FileUpload>,
}

impl BusinessRequest {
    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Validate and store one extracted value. Parameters that do not
    /// match a declared field, or arrive from the wrong position, are
    /// ignored.
    pub fn set_value(
        &mut self,
        name: &str,
        value: &str,
        position: FieldPosition,
    ) -> Result<(), HttpError> {
        let Some(field) = self.page.field(name) else {
            trace!("no field for parameter {name}");
            return Ok(());
        };
        if !field.position().accepts(position) {
            trace!("field {name} not accepted from {position:?}");
            return Ok(());
        }
        if !field.validate(value) {
            return Err(HttpError::incorrect(format!("Invalid value for {name}")));
        }
        self.values.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    /// Store a completed upload for a file field.
    pub fn set_file_upload(&mut self, upload: FileUpload) {
        self.uploads.insert(upload.name().to_owned(), upload);
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn upload(&self, name: &str) -> Option<&FileUpload> {
        self.uploads.get(name)
    }

    /// Take an upload out of the request, typically to claim its backing
    /// file before cleanup.
    pub fn take_upload(&mut self, name: &str) -> Option<FileUpload> {
        self.uploads.remove(name)
    }

    /// All mandatory fields carry a value (or an upload, for file
    /// fields).
    pub fn is_valid(&self) -> bool {
        self.page.fields().iter().all(|field| {
            if !field.is_mandatory() {
                return true;
            }
            match field.role() {
                FieldRole::InputFile => self.uploads.contains_key(field.name()),
                _ => self.values.contains_key(field.name()),
            }
        })
    }

    pub fn content_type(&self) -> &str {
        self.page.content_type()
    }

    /// Surface an error message through the page's error-info field.
    pub fn set_error_info(&mut self, message: &str) {
        let _ = self.set_value(ERROR_INFO, message, FieldPosition::Body);
    }

    /// Render the page template, substituting `${name}` placeholders.
    pub fn render(&self) -> String {
        let mut out = self.page.template.clone();
        for field in self.page.fields() {
            let placeholder = format!("${{{}}}", field.name());
            if out.contains(&placeholder) {
                let value = self.value(field.name()).unwrap_or("");
                out = out.replace(&placeholder, value);
            }
        }
        out
    }

    /// Cookies declared for export by `cookie_set` fields.
    pub fn cookie_set_fields(&self) -> Vec<Cookie> {
        self.page
            .fields()
            .iter()
            .filter(|field| field.is_cookie_set())
            .filter_map(|field| {
                self.value(field.name())
                    .map(|value| Cookie::new(field.name(), value))
            })
            .collect()
    }
}

// ===== Test =====
