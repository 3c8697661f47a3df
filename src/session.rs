//! Per-connection session state.
use std::fmt;

use crate::page::PageRole;

/// Sentinel for "no log entry allocated".
pub const NO_LOGID: i64 = -1;

/// Decision interface of the external authentication backend.
pub trait HttpAuth: Send + Sync + fmt::Debug {
    fn user(&self) -> &str;

    fn account(&self) -> &str;

    /// Whether the principal has been identified.
    fn is_identified(&self) -> bool;

    /// Whether the given operation (store or retrieve) is allowed.
    fn is_valid_operation(&self, is_store: bool) -> bool;
}

/// Anonymous principal installed at connection activation.
#[derive(Debug, Default)]
pub struct DefaultAuth {
    user: String,
    account: String,
    identified: bool,
}

impl DefaultAuth {
    pub fn identified(user: impl Into<String>, account: impl Into<String>) -> Self {
        Self { user: user.into(), account: account.into(), identified: true }
    }
}

impl HttpAuth for DefaultAuth {
    fn user(&self) -> &str {
        &self.user
    }

    fn account(&self) -> &str {
        &self.account
    }

    fn is_identified(&self) -> bool {
        self.identified
    }

    fn is_valid_operation(&self, _is_store: bool) -> bool {
        self.identified
    }
}

/// Session bound to one transport connection.
///
/// Created on connection activation, destroyed on inactivation, mutated
/// only by the owning engine. The transient filename and log id belong to
/// the request in flight and are reset by the engine's `clean()`.
#[derive(Debug)]
pub struct Session {
    cookie_session: String,
    auth: Box<dyn HttpAuth>,
    current_command: PageRole,
    filename: Option<String>,
    logid: i64,
}

impl Session {
    /// New session with a freshly minted cookie token and an anonymous
    /// principal.
    pub fn new() -> Self {
        Self {
            cookie_session: new_session_token(),
            auth: Box::new(DefaultAuth::default()),
            current_command: PageRole::Html,
            filename: None,
            logid: NO_LOGID,
        }
    }

    pub fn cookie_session(&self) -> &str {
        &self.cookie_session
    }

    pub fn set_cookie_session(&mut self, token: impl Into<String>) {
        self.cookie_session = token.into();
    }

    pub fn auth(&self) -> &dyn HttpAuth {
        &*self.auth
    }

    pub fn set_auth(&mut self, auth: Box<dyn HttpAuth>) {
        self.auth = auth;
    }

    pub fn current_command(&self) -> PageRole {
        self.current_command
    }

    pub fn set_current_command(&mut self, role: PageRole) {
        self.current_command = role;
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, filename: Option<String>) {
        self.filename = filename;
    }

    pub fn logid(&self) -> i64 {
        self.logid
    }

    pub fn set_logid(&mut self, logid: i64) {
        self.logid = logid;
    }

    /// Reset the per-request transient attributes.
    pub fn clean_transient(&mut self) {
        self.filename = None;
        self.logid = NO_LOGID;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint an opaque session token.
pub fn new_session_token() -> String {
    format!("Waarp{:x}", rand::random::<u64>())
}

// ===== Test =====

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_is_prefixed_and_unique() {
        let a = new_session_token();
        let b = new_session_token();
        assert!(a.starts_with("Waarp"));
        assert_ne!(a, b);
    }

    #[test]
    fn clean_transient_resets() {
        let mut session = Session::new();
        session.set_filename(Some("upload.bin".into()));
        session.set_logid(42);
        session.clean_transient();
        assert_eq!(session.filename(), None);
        assert_eq!(session.logid(), NO_LOGID);
    }
}
