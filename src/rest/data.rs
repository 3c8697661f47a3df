//! Data-model handlers: CRUD against an external persistence layer.
use http::{Method, StatusCode};
use serde_json::{Value, json};
use std::fmt;

use crate::error::HttpError;
use crate::log::warning;
use crate::session::Session;

use super::argument::{JSON_COMMAND, JSON_PATH, RestArgument};
use super::handler::{CommandType, RestConfiguration, RestHandler};

/// Persistence update marker; creations and updates are handed to the
/// store as `ToSubmit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatedInfo {
    Unknown,
    NotUpdated,
    Interrupted,
    ToSubmit,
    InError,
    Running,
    Done,
}

/// One persisted entity, as seen by the REST surface.
///
/// The insert/update/delete operations are the referenced CRUD contract
/// of the external persistence layer.
pub trait DataItem {
    /// JSON projection of the entity.
    fn json(&self) -> Value;

    /// Merge a JSON body into the entity (partial update).
    fn set_from_json(&mut self, body: &Value) -> Result<(), HttpError>;

    fn set_updated_info(&mut self, info: UpdatedInfo);

    fn insert(&mut self) -> Result<(), HttpError>;

    fn update(&mut self) -> Result<(), HttpError>;

    fn delete(&mut self) -> Result<(), HttpError>;
}

/// The model side of a [`DataModelHandler`]: entity lookup and creation
/// plus the prepared-statement style listing used by multi-get.
pub trait DataModel: Send + Sync {
    type Item: DataItem;

    /// Iterator of selected items, the moral equivalent of walking a
    /// prepared statement.
    type Statement: Iterator<Item = Result<Self::Item, HttpError>>;

    /// Name of the primary property carried in the URI for unique access.
    fn primary_key(&self) -> &str;

    /// Per-method authorization; the default allows everything.
    fn check_authorization(
        &self,
        session: &Session,
        args: &RestArgument,
        method: &Method,
    ) -> Result<(), HttpError> {
        let _ = (session, args, method);
        Ok(())
    }

    /// Select the entity addressed by the request (read, update, delete).
    fn get_item(
        &self,
        session: &Session,
        args: &RestArgument,
        body: Option<&Value>,
    ) -> Result<Self::Item, HttpError>;

    /// Build a new, not yet inserted entity (create).
    fn create_item(
        &self,
        session: &Session,
        args: &RestArgument,
        body: Option<&Value>,
    ) -> Result<Self::Item, HttpError>;

    /// Prepare the listing for multi-get, honoring a possible filter.
    fn prepared_statement(
        &self,
        session: &Session,
        args: &RestArgument,
        body: Option<&Value>,
    ) -> Result<Self::Statement, HttpError>;

    /// JSON schema of the entity, for OPTIONS descriptions.
    fn json_schema(&self) -> Value {
        Value::Null
    }
}

/// Generic REST handler for one data model: maps the method/arity table
/// to CRUD calls and tags every reply with its command.
pub struct DataModelHandler<M> {
    path: String,
    methods: Vec<Method>,
    model: M,
}

impl<M: DataModel> DataModelHandler<M> {
    pub fn new(path: impl Into<String>, methods: impl Into<Vec<Method>>, model: M) -> Self {
        let mut methods = methods.into();
        if !methods.contains(&Method::OPTIONS) {
            methods.push(Method::OPTIONS);
        }
        Self { path: path.into(), methods, model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn set_ok(&self, resp: &mut RestArgument) {
        resp.set_result_status(StatusCode::OK);
    }

    fn get_all(
        &self,
        session: &Session,
        args: &RestArgument,
        resp: &mut RestArgument,
        body: Option<&Value>,
    ) -> Result<(), HttpError> {
        let limit = args.limit_from_uri();
        let mut statement = self.model.prepared_statement(session, args, body)?;
        resp.add_filter(body);
        let mut count = 0;
        while count < limit {
            match statement.next() {
                Some(item) => {
                    resp.add_result(item?.json());
                    count += 1;
                }
                None => break,
            }
        }
        resp.add_count_limit(count, limit);
        resp.set_command(CommandType::MultiGet);
        self.set_ok(resp);
        Ok(())
    }

    fn get_one(
        &self,
        session: &Session,
        args: &RestArgument,
        resp: &mut RestArgument,
        body: Option<&Value>,
    ) -> Result<(), HttpError> {
        let item = self.model.get_item(session, args, body)?;
        resp.set_answer(item.json());
        resp.set_command(CommandType::Get);
        self.set_ok(resp);
        Ok(())
    }

    fn post(
        &self,
        session: &Session,
        args: &RestArgument,
        resp: &mut RestArgument,
        body: Option<&Value>,
    ) -> Result<(), HttpError> {
        let mut item = self.model.create_item(session, args, body)?;
        item.set_updated_info(UpdatedInfo::ToSubmit);
        item.insert()?;
        resp.set_answer(item.json());
        resp.set_command(CommandType::Create);
        self.set_ok(resp);
        Ok(())
    }

    fn put(
        &self,
        session: &Session,
        args: &RestArgument,
        resp: &mut RestArgument,
        body: Option<&Value>,
    ) -> Result<(), HttpError> {
        let mut item = self.model.get_item(session, args, body)?;
        item.set_from_json(&Value::Object(args.body()))?;
        item.set_updated_info(UpdatedInfo::ToSubmit);
        item.update()?;
        resp.set_answer(item.json());
        resp.set_command(CommandType::Update);
        self.set_ok(resp);
        Ok(())
    }

    fn delete(
        &self,
        session: &Session,
        args: &RestArgument,
        resp: &mut RestArgument,
        body: Option<&Value>,
    ) -> Result<(), HttpError> {
        let mut item = self.model.get_item(session, args, body)?;
        item.delete()?;
        resp.set_answer(item.json());
        resp.set_command(CommandType::Delete);
        self.set_ok(resp);
        Ok(())
    }
}

impl<M: DataModel> RestHandler for DataModelHandler<M> {
    fn path(&self) -> &str {
        &self.path
    }

    fn methods(&self) -> &[Method] {
        &self.methods
    }

    fn body_json_decoded(&self) -> bool {
        true
    }

    /// Allowed: GET with zero or one extra segment, POST with none,
    /// PUT/DELETE with exactly one, OPTIONS always. Anything else is
    /// forbidden.
    fn check_handler_session(
        &self,
        session: &Session,
        args: &mut RestArgument,
        resp: &mut RestArgument,
    ) -> Result<(), HttpError> {
        let _ = resp;
        let method = args.method();
        if !self.is_method_included(&method) {
            warning!("not allowed: {method} {}", args.uri());
            return Err(HttpError::forbidden(format!("Unallowed Method: {method}")));
        }
        self.model.check_authorization(session, args, &method)?;
        let has_one_extra_path_as_id = args.sub_uri_size() == 1;
        let has_no_extra_path = args.sub_uri_size() == 0;
        if has_one_extra_path_as_id {
            args.add_id_to_uri_args();
        }
        let allowed = match method.as_str() {
            "DELETE" | "PUT" => has_one_extra_path_as_id,
            "GET" | "OPTIONS" => true,
            "POST" => has_no_extra_path,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            warning!("not allowed: {method} {}", args.uri());
            Err(HttpError::forbidden("Unallowed Method and arguments combination"))
        }
    }

    fn end_parsing_request(
        &self,
        session: &mut Session,
        args: &mut RestArgument,
        resp: &mut RestArgument,
        body: Option<&Value>,
    ) -> Result<(), HttpError> {
        let method = args.method();
        match method.as_str() {
            "DELETE" => self.delete(session, args, resp, body),
            "GET" if args.sub_uri_size() == 0 => self.get_all(session, args, resp, body),
            "GET" => self.get_one(session, args, resp, body),
            "POST" => self.post(session, args, resp, body),
            "PUT" => self.put(session, args, resp, body),
            _ => Err(HttpError::incorrect(format!("Incorrect request: {method}"))),
        }
    }

    fn detailed_allow(&self) -> Value {
        let id_path = format!("/{}/{{{}}}", self.path, self.model.primary_key());
        let base_path = format!("/{}", self.path);
        let mut detailed = Vec::new();
        for method in self.methods() {
            let entry = match method.as_str() {
                "GET" => json!({
                    JSON_PATH: id_path,
                    JSON_COMMAND: CommandType::Get.as_str(),
                }),
                "POST" => json!({
                    JSON_PATH: base_path,
                    JSON_COMMAND: CommandType::Create.as_str(),
                    "body": self.model.json_schema(),
                }),
                "PUT" => json!({
                    JSON_PATH: id_path,
                    JSON_COMMAND: CommandType::Update.as_str(),
                    "body": self.model.json_schema(),
                }),
                "DELETE" => json!({
                    JSON_PATH: id_path,
                    JSON_COMMAND: CommandType::Delete.as_str(),
                }),
                "OPTIONS" => json!({
                    JSON_PATH: base_path,
                    JSON_COMMAND: CommandType::Options.as_str(),
                }),
                _ => continue,
            };
            detailed.push(json!({ method.as_str(): entry }));
        }
        Value::Array(detailed)
    }

    fn options_command(
        &self,
        _config: &RestConfiguration,
        _args: &RestArgument,
        resp: &mut RestArgument,
    ) {
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
}

impl<M> fmt::Debug for DataModelHandler<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataModelHandler")
            .field("path", &self.path)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}
