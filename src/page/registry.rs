//! Immutable lookup from `(path, method)` to pages.
use std::collections::HashMap;
use std::sync::Arc;

use http::Method;

use crate::error::HttpError;

use super::page::Page;

/// Pages keyed by `(path, method)` plus the status-code → error-page map.
/// Built once at startup, read-only afterwards.
#[derive(Debug, Default)]
pub struct PageRegistry {
    pages: HashMap<(String, Method), Arc<Page>>,
    error_pages: HashMap<u16, Arc<Page>>,
}

impl PageRegistry {
    pub fn builder() -> PageRegistryBuilder {
        PageRegistryBuilder { registry: PageRegistry::default() }
    }

    /// Look up the page serving `(path, method)`.
    ///
    /// `Ok(None)` means no page claims the path at all (the caller falls
    /// back to static GET or 404); a path bound under a different method
    /// is a malformed request.
    pub fn get(&self, path: &str, method: &Method) -> Result<Option<&Arc<Page>>, HttpError> {
        if let Some(page) = self.pages.get(&(path.to_owned(), method.clone())) {
            return Ok(Some(page));
        }
        if self.pages.keys().any(|(p, _)| p == path) {
            return Err(HttpError::incorrect(format!(
                "Method {method} not valid for {path}"
            )));
        }
        Ok(None)
    }

    /// The canonical error page for an HTTP status, if one is registered.
    pub fn error_page(&self, status: u16) -> Option<&Arc<Page>> {
        self.error_pages.get(&status)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Builder for [`PageRegistry`].
#[derive(Debug)]
pub struct PageRegistryBuilder {
    registry: PageRegistry,
}

impl PageRegistryBuilder {
    /// Register a page under its URI and role-implied method.
    ///
    /// # Panics
    ///
    /// Panics when registering a page whose role is
    /// [`PageRole::Error`](super::PageRole::Error); error pages go
    /// through [`error_page`](Self::error_page).
    pub fn page(mut self, page: Arc<Page>) -> Self {
        let method = page
            .role()
            .method()
            .expect("error pages are registered by status");
        self.registry
            .pages
            .insert((page.uri().to_owned(), method), page);
        self
    }

    /// Register the canonical error page for a status code.
    pub fn error_page(mut self, status: u16, page: Arc<Page>) -> Self {
        self.registry.error_pages.insert(status, page);
        self
    }

    pub fn build(self) -> Arc<PageRegistry> {
        Arc::new(self.registry)
    }
}

// ===== Test =====

#[cfg(test)]
mod test {
    use super::*;
    use crate::page::PageRole;

    fn registry() -> Arc<PageRegistry> {
        PageRegistry::builder()
            .page(Page::builder("home", "/", PageRole::Html).build())
            .page(Page::builder("up", "/up", PageRole::PostUpload).build())
            .error_page(400, Page::builder("err400", "/error", PageRole::Error).build())
            .build()
    }

    #[test]
    fn lookup_by_path_and_method() {
        let registry = registry();
        let page = registry.get("/", &Method::GET).unwrap().unwrap();
        assert_eq!(page.name(), "home");
        assert!(registry.get("/missing", &Method::GET).unwrap().is_none());
    }

    #[test]
    fn wrong_method_is_malformed() {
        let registry = registry();
        let err = registry.get("/up", &Method::GET).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn error_page_by_status() {
        let registry = registry();
        assert_eq!(registry.error_page(400).unwrap().name(), "err400");
        assert!(registry.error_page(500).is_none());
    }
}
