//! The root OPTIONS handler: discovery of the whole REST surface.
use http::Method;
use serde_json::{Value, json};

use crate::error::HttpError;
use crate::session::Session;

use super::argument::{JSON_COMMAND, JSON_PATH, RestArgument, X_ALLOW_URIS, X_DETAILED_ALLOW};
use super::handler::{CommandType, RestConfiguration, RestHandler};

pub const ROOT: &str = "root";

const OPTIONS_METHODS: [Method; 1] = [Method::OPTIONS];

/// Answers `OPTIONS /` (and OPTIONS on unbound URIs) with the aggregated
/// surface of every registered handler: the `Allow` method union, the
/// `X-Allow-URIs` path union, and the per-path `X-Detailed-Allow`
/// description.
#[derive(Debug, Default, Clone, Copy)]
pub struct RootOptionsHandler;

impl RestHandler for RootOptionsHandler {
    fn path(&self) -> &str {
        "/"
    }

    fn methods(&self) -> &[Method] {
        &OPTIONS_METHODS
    }

    fn need_auth(&self) -> bool {
        false
    }

    fn check_handler_session(
        &self,
        _session: &Session,
        _args: &mut RestArgument,
        _resp: &mut RestArgument,
    ) -> Result<(), HttpError> {
        Ok(())
    }

    fn end_parsing_request(
        &self,
        _session: &mut Session,
        _args: &mut RestArgument,
        _resp: &mut RestArgument,
        _body: Option<&Value>,
    ) -> Result<(), HttpError> {
        Ok(())
    }

    fn options_command(
        &self,
        config: &RestConfiguration,
        _args: &RestArgument,
        resp: &mut RestArgument,
    ) {
        let allow = config
            .allowed_methods()
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(",");
        resp.add_item(http::header::ALLOW.as_str(), Value::String(allow));

        let uris = config
            .handlers()
            .map(|handler| handler.path())
            .collect::<Vec<_>>()
            .join(",");
        resp.add_item(X_ALLOW_URIS, Value::String(uris));

        let mut detailed = Vec::new();
        for handler in config.handlers() {
            detailed.push(json!({ (handler.path()): handler.detailed_allow() }));
        }
        detailed.push(json!({ ROOT: self.detailed_allow() }));
        resp.add_item(X_DETAILED_ALLOW, Value::Array(detailed));
        resp.set_command(CommandType::Options);
    }

    fn detailed_allow(&self) -> Value {
        json!([{
            (Method::OPTIONS.as_str()): {
                JSON_PATH: self.path(),
                JSON_COMMAND: (CommandType::Options.as_str()),
            }
        }])
    }
}
