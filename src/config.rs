//! Gateway configuration.
use std::io;
use std::path::PathBuf;

use crate::multipart::TempFileFactory;

/// Default name of the session cookie.
pub const DEFAULT_SESSION_COOKIE: &str = "cookieSession";

/// Static configuration shared by every connection of a gateway.
///
/// [`initialize`](GatewayConfig::initialize) must run once before the
/// first request: it creates the temp directory eagerly and returns the
/// shared [`TempFileFactory`] the engines spill into.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Filesystem prefix for the unbound-GET static fallback.
    pub base_static_path: String,
    /// Name of the session cookie echoed or minted on every response.
    pub session_cookie_name: String,
    /// Directory for spilled body parts.
    pub temp_path: PathBuf,
}

impl GatewayConfig {
    pub fn new(
        base_static_path: impl Into<String>,
        session_cookie_name: impl Into<String>,
        temp_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_static_path: base_static_path.into(),
            session_cookie_name: session_cookie_name.into(),
            temp_path: temp_path.into(),
        }
    }

    /// Create the temp directory and the shared temp-file factory.
    pub fn initialize(&self) -> io::Result<TempFileFactory> {
        TempFileFactory::new(&self.temp_path)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_static_path: "static".into(),
            session_cookie_name: DEFAULT_SESSION_COOKIE.into(),
            temp_path: std::env::temp_dir().join("torii"),
        }
    }
}
