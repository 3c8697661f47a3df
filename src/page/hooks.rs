//! Application capability hooks for the page engine.
use crate::cookie::Cookie;
use crate::error::HttpError;
use crate::session::Session;

use super::page::BusinessRequest;

/// The application side of the page engine.
///
/// One stateless value per gateway; the engine owns all per-connection
/// state and passes it in. Every hook has a permissive default so an
/// implementation only overrides what it needs.
pub trait PageHooks: Send + Sync {
    /// Check correctness of the connection before dispatch. Return an
    /// error with the appropriate status (401/403) to refuse.
    fn check_connection(&self, session: &mut Session) -> Result<(), HttpError> {
        let _ = session;
        Ok(())
    }

    /// Called when an error is raised, before the request is cleaned.
    fn error(&self, session: &mut Session) {
        let _ = session;
    }

    /// The filename attached to the current request, recorded in the
    /// session before delete handling.
    fn filename(&self, session: &Session) -> Option<String> {
        let _ = session;
        None
    }

    /// Whether an incoming cookie may be consumed and echoed.
    fn is_cookie_valid(&self, cookie: &Cookie) -> bool {
        let _ = cookie;
        true
    }

    /// Called before a Menu or Html page is rendered.
    fn before_simple_page(
        &self,
        session: &mut Session,
        request: &mut BusinessRequest,
    ) -> Result<(), HttpError> {
        let _ = (session, request);
        Ok(())
    }

    /// Validate the business request once all data is in, before the
    /// field-level validity check.
    fn valid_request_after_all_data(
        &self,
        session: &mut Session,
        request: &mut BusinessRequest,
    ) -> Result<(), HttpError> {
        let _ = (session, request);
        Ok(())
    }

    fn final_delete(
        &self,
        session: &mut Session,
        request: &mut BusinessRequest,
    ) -> Result<(), HttpError> {
        let _ = (session, request);
        Ok(())
    }

    /// Resolve the file to stream back for a download page. The returned
    /// path is delegated to the external file-serving helper.
    fn final_get(
        &self,
        session: &mut Session,
        request: &mut BusinessRequest,
    ) -> Result<String, HttpError> {
        let _ = (session, request);
        Err(HttpError::not_found("No file for this request"))
    }

    fn final_post(
        &self,
        session: &mut Session,
        request: &mut BusinessRequest,
    ) -> Result<(), HttpError> {
        let _ = (session, request);
        Ok(())
    }

    fn final_post_upload(
        &self,
        session: &mut Session,
        request: &mut BusinessRequest,
    ) -> Result<(), HttpError> {
        let _ = (session, request);
        Ok(())
    }

    fn final_put(
        &self,
        session: &mut Session,
        request: &mut BusinessRequest,
    ) -> Result<(), HttpError> {
        let _ = (session, request);
        Ok(())
    }
}

/// Hooks accepting everything and doing nothing; handy for tests and
/// static-only gateways.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPageHooks;

impl PageHooks for DefaultPageHooks {}
