//! Engine-level scenarios for the REST engine: CRUD round trips, OPTIONS
//! discovery, error envelopes.
use bytes::Bytes;
use http::header::{ALLOW, CONTENT_TYPE, SET_COOKIE};
use http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use torii::codec::{Action, BodyChunk, FullResponse, HttpMessage, RequestHead};
use torii::config::GatewayConfig;
use torii::error::HttpError;
use torii::multipart::TempFileFactory;
use torii::rest::{
    DataItem, DataModel, DataModelHandler, DefaultRestHooks, RestArgument, RestConfiguration,
    RestEngine, UpdatedInfo, X_ALLOW_URIS, X_DETAILED_ALLOW,
};
use torii::session::{DefaultAuth, Session};

fn remote() -> SocketAddr {
    "10.0.0.9:40123".parse().unwrap()
}

// ===== In-memory data model =====

type Store = Arc<Mutex<BTreeMap<String, Value>>>;

struct MemoryModel {
    store: Store,
}

struct MemoryItem {
    id: String,
    data: Value,
    store: Store,
}

impl DataItem for MemoryItem {
    fn json(&self) -> Value {
        let mut data = self.data.clone();
        data["id"] = json!(self.id);
        data
    }

    fn set_from_json(&mut self, body: &Value) -> Result<(), HttpError> {
        if let Some(map) = body.as_object() {
            for (key, value) in map {
                self.data[key] = value.clone();
            }
        }
        Ok(())
    }

    fn set_updated_info(&mut self, info: UpdatedInfo) {
        self.data["updatedInfo"] = json!(format!("{info:?}").to_uppercase());
    }

    fn insert(&mut self) -> Result<(), HttpError> {
        self.store
            .lock()
            .unwrap()
            .insert(self.id.clone(), self.data.clone());
        Ok(())
    }

    fn update(&mut self) -> Result<(), HttpError> {
        let mut store = self.store.lock().unwrap();
        if !store.contains_key(&self.id) {
            return Err(HttpError::not_found(format!("no item {}", self.id)));
        }
        store.insert(self.id.clone(), self.data.clone());
        Ok(())
    }

    fn delete(&mut self) -> Result<(), HttpError> {
        self.store
            .lock()
            .unwrap()
            .remove(&self.id)
            .map(|_| ())
            .ok_or_else(|| HttpError::not_found(format!("no item {}", self.id)))
    }
}

impl DataModel for MemoryModel {
    type Item = MemoryItem;
    type Statement = std::vec::IntoIter<Result<MemoryItem, HttpError>>;

    fn primary_key(&self) -> &str {
        "id"
    }

    fn get_item(
        &self,
        _session: &Session,
        args: &RestArgument,
        _body: Option<&Value>,
    ) -> Result<MemoryItem, HttpError> {
        let id = args
            .id()
            .ok_or_else(|| HttpError::incorrect("missing id"))?
            .to_owned();
        let data = self
            .store
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| HttpError::not_found(format!("no item {id}")))?;
        Ok(MemoryItem { id, data, store: self.store.clone() })
    }

    fn create_item(
        &self,
        _session: &Session,
        _args: &RestArgument,
        body: Option<&Value>,
    ) -> Result<MemoryItem, HttpError> {
        let body = body.ok_or_else(|| HttpError::incorrect("missing body"))?;
        let id = body["id"]
            .as_str()
            .ok_or_else(|| HttpError::incorrect("missing id in body"))?
            .to_owned();
        let mut data = body.clone();
        if let Some(map) = data.as_object_mut() {
            map.remove("id");
        }
        Ok(MemoryItem { id, data, store: self.store.clone() })
    }

    fn prepared_statement(
        &self,
        _session: &Session,
        _args: &RestArgument,
        _body: Option<&Value>,
    ) -> Result<Self::Statement, HttpError> {
        let store = self.store.lock().unwrap();
        let items: Vec<Result<MemoryItem, HttpError>> = store
            .iter()
            .map(|(id, data)| {
                Ok(MemoryItem {
                    id: id.clone(),
                    data: data.clone(),
                    store: self.store.clone(),
                })
            })
            .collect();
        Ok(items.into_iter())
    }

    fn json_schema(&self) -> Value {
        json!({"id": "string"})
    }
}

// ===== Harness =====

fn crud_methods() -> Vec<Method> {
    vec![Method::GET, Method::POST, Method::PUT, Method::DELETE]
}

/// Engine with an anonymous, unidentified session.
fn setup_anonymous(test: &str) -> (RestEngine<DefaultRestHooks>, Store) {
    let store: Store = Store::default();
    let config = RestConfiguration::builder()
        .handler(Arc::new(DataModelHandler::new(
            "items",
            crud_methods(),
            MemoryModel { store: store.clone() },
        )))
        .build();
    let gateway = GatewayConfig::new(
        "/var/www",
        "cookieSession",
        std::env::temp_dir().join(format!("torii-it-rest-{test}")),
    );
    let factory: TempFileFactory = gateway.initialize().unwrap();
    let engine = RestEngine::activate(config, gateway, factory, DefaultRestHooks, remote());
    (engine, store)
}

/// Engine whose session carries an identified principal, as the
/// data-model handlers require.
fn setup(test: &str) -> (RestEngine<DefaultRestHooks>, Store) {
    let (mut engine, store) = setup_anonymous(test);
    engine
        .session_mut()
        .set_auth(Box::new(DefaultAuth::identified("admin", "gateway")));
    (engine, store)
}

fn request(method: Method, uri: &str, body: Option<Value>) -> HttpMessage {
    let body = body
        .map(|v| Bytes::from(v.to_string()))
        .unwrap_or_default();
    HttpMessage::Head(RequestHead::full(
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap(),
    ))
}

fn respond(mut actions: Vec<Action>) -> FullResponse {
    assert_eq!(actions.len(), 1, "expected a single response");
    match actions.pop().unwrap() {
        Action::Respond(full) => full,
        other => panic!("expected Respond, got {other:?}"),
    }
}

fn body_json(full: &FullResponse) -> Value {
    serde_json::from_slice(full.body()).expect("json body")
}

fn assert_session_cookie(full: &FullResponse) {
    assert!(
        full.headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.starts_with("cookieSession=")),
        "session cookie missing"
    );
}

// ===== CRUD round trip =====

#[test]
fn create_get_put_delete_round_trip() {
    let (mut engine, _store) = setup("crud");

    let full = respond(engine.recv(request(
        Method::POST,
        "/items",
        Some(json!({"id": "i1", "a": 1})),
    )));
    assert_eq!(full.status(), StatusCode::OK);
    assert!(!full.close);
    assert_eq!(
        full.headers().get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_session_cookie(&full);
    let reply = body_json(&full);
    assert_eq!(reply["command"], "CREATE");
    assert_eq!(reply["answer"]["a"], 1);
    assert_eq!(reply["answer"]["id"], "i1");
    assert_eq!(reply["result"], 200);

    let full = respond(engine.recv(request(Method::GET, "/items/i1", None)));
    let reply = body_json(&full);
    assert_eq!(reply["command"], "GET");
    assert_eq!(reply["answer"]["a"], 1);
    assert_eq!(reply["answer"]["id"], "i1");

    // PUT with no changes is idempotent
    let full = respond(engine.recv(request(Method::PUT, "/items/i1", Some(json!({})))));
    let reply = body_json(&full);
    assert_eq!(reply["command"], "UPDATE");
    let full = respond(engine.recv(request(Method::GET, "/items/i1", None)));
    let reply = body_json(&full);
    assert_eq!(reply["answer"]["a"], 1);

    let full = respond(engine.recv(request(Method::DELETE, "/items/i1", None)));
    let reply = body_json(&full);
    assert_eq!(reply["command"], "DELETE");
    assert_eq!(full.status(), StatusCode::OK);

    // the entity is gone; the error closes the connection
    let full = respond(engine.recv(request(Method::GET, "/items/i1", None)));
    assert_eq!(full.status(), StatusCode::NOT_FOUND);
    assert!(full.close);
    let reply = body_json(&full);
    assert!(reply["detail"].as_str().unwrap().contains("no item i1"));
    assert!(engine.is_closed());
}

#[test]
fn update_merges_json_body() {
    let (mut engine, _store) = setup("merge");
    respond(engine.recv(request(Method::POST, "/items", Some(json!({"id": "i1", "a": 1})))));
    let full = respond(engine.recv(request(
        Method::PUT,
        "/items/i1",
        Some(json!({"b": "two"})),
    )));
    let reply = body_json(&full);
    assert_eq!(reply["answer"]["a"], 1);
    assert_eq!(reply["answer"]["b"], "two");
    assert_eq!(reply["answer"]["updatedInfo"], "TOSUBMIT");
}

#[test]
fn list_honors_limit_and_counts() {
    let (mut engine, _store) = setup("list");
    for id in ["a", "b", "c"] {
        respond(engine.recv(request(Method::POST, "/items", Some(json!({"id": id})))));
    }
    let full = respond(engine.recv(request(Method::GET, "/items", None)));
    let reply = body_json(&full);
    assert_eq!(reply["command"], "MULTIGET");
    assert_eq!(reply["count"], 3);
    assert_eq!(reply["limit"], 100);
    assert_eq!(reply["results"].as_array().unwrap().len(), 3);

    let full = respond(engine.recv(request(Method::GET, "/items?limit=2", None)));
    let reply = body_json(&full);
    assert_eq!(reply["count"], 2);
    assert_eq!(reply["limit"], 2);
}

// ===== Streaming JSON body =====

#[test]
fn chunked_json_body_is_cumulated_then_parsed() {
    let (mut engine, _store) = setup("chunked");
    let head = HttpMessage::Head(RequestHead::streaming(
        Request::builder()
            .method(Method::POST)
            .uri("/items")
            .header("content-type", "application/json")
            .body(())
            .unwrap(),
    ));
    assert!(engine.recv(head).is_empty());
    // split in the middle of a JSON token
    assert!(
        engine
            .recv(HttpMessage::Chunk(BodyChunk::new(&br#"{"id": "chu"#[..])))
            .is_empty()
    );
    let full = respond(engine.recv(HttpMessage::Chunk(BodyChunk::last(
        &br#"nked", "n": 7}"#[..],
    ))));
    assert_eq!(full.status(), StatusCode::OK);
    let reply = body_json(&full);
    assert_eq!(reply["command"], "CREATE");
    assert_eq!(reply["answer"]["id"], "chunked");
    assert_eq!(reply["answer"]["n"], 7);
}

// ===== OPTIONS discovery =====

#[test]
fn options_on_root_aggregates_the_surface() {
    let (mut engine, _store) = setup("options-root");
    let full = respond(engine.recv(request(Method::OPTIONS, "/", None)));
    assert_eq!(full.status(), StatusCode::OK);
    assert_eq!(
        full.headers().get(ALLOW).unwrap(),
        "GET,POST,PUT,DELETE,OPTIONS"
    );
    assert_eq!(full.headers().get(X_ALLOW_URIS).unwrap(), "items");
    assert!(full.headers().get(X_DETAILED_ALLOW).is_some());

    let reply = body_json(&full);
    assert_eq!(reply["command"], "OPTIONS");
    let detailed = reply["answer"][X_DETAILED_ALLOW].as_array().unwrap();
    assert_eq!(detailed.len(), 2, "items plus root");
    assert!(detailed.iter().any(|entry| entry.get("items").is_some()));
    assert!(detailed.iter().any(|entry| entry.get("root").is_some()));
}

#[test]
fn options_on_handler_describes_it() {
    let (mut engine, _store) = setup("options-handler");
    let full = respond(engine.recv(request(Method::OPTIONS, "/items", None)));
    let reply = body_json(&full);
    assert_eq!(reply["command"], "OPTIONS");
    let detailed = reply["answer"][X_DETAILED_ALLOW].as_array().unwrap();
    // every method described with its command and path
    let commands: Vec<&str> = detailed
        .iter()
        .flat_map(|entry| entry.as_object().unwrap().values())
        .filter_map(|d| d["command"].as_str())
        .collect();
    assert!(commands.contains(&"CREATE"));
    assert!(commands.contains(&"UPDATE"));
    assert!(commands.contains(&"DELETE"));
}

// ===== Error envelope =====

#[test]
fn unknown_uri_is_method_not_allowed() {
    let (mut engine, _store) = setup("unknown");
    let full = respond(engine.recv(request(Method::GET, "/nope", None)));
    assert_eq!(full.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(full.close);
    let reply = body_json(&full);
    assert!(
        reply["detail"]
            .as_str()
            .unwrap()
            .contains("No Method found for that URI")
    );
}

#[test]
fn post_with_id_segment_is_forbidden() {
    let (mut engine, _store) = setup("arity");
    let full = respond(engine.recv(request(
        Method::POST,
        "/items/i1",
        Some(json!({"id": "i1"})),
    )));
    assert_eq!(full.status(), StatusCode::FORBIDDEN);
    assert_session_cookie(&full);
}

#[test]
fn put_without_id_segment_is_forbidden() {
    let (mut engine, _store) = setup("arity-put");
    let full = respond(engine.recv(request(Method::PUT, "/items", Some(json!({})))));
    assert_eq!(full.status(), StatusCode::FORBIDDEN);
}

#[test]
fn duplicated_query_parameter_is_rejected() {
    let (mut engine, _store) = setup("multivalue");
    let full = respond(engine.recv(request(Method::GET, "/items?x=1&x=2", None)));
    assert_eq!(full.status(), StatusCode::BAD_REQUEST);
    let reply = body_json(&full);
    assert!(reply["detail"].as_str().unwrap().contains("Too many values for x"));
}

#[test]
fn malformed_json_body_reports_detail() {
    let (mut engine, _store) = setup("badjson");
    let head = HttpMessage::Head(RequestHead::full(
        Request::builder()
            .method(Method::POST)
            .uri("/items")
            .header("content-type", "application/json")
            .body(Bytes::from_static(b"{not json"))
            .unwrap(),
    ));
    let full = respond(engine.recv(head));
    assert_eq!(full.status(), StatusCode::BAD_REQUEST);
    let reply = body_json(&full);
    assert_eq!(reply["detail"], "ERROR: JSON body cannot be parsed");
}

#[test]
fn unidentified_session_is_refused() {
    let (mut engine, _store) = setup_anonymous("noauth");
    let full = respond(engine.recv(request(
        Method::POST,
        "/items",
        Some(json!({"id": "i1"})),
    )));
    assert_eq!(full.status(), StatusCode::UNAUTHORIZED);
    assert!(full.close);
    assert_session_cookie(&full);
    let reply = body_json(&full);
    assert!(reply["detail"].as_str().unwrap().contains("Invalid authentication"));
}

#[test]
fn options_on_root_needs_no_authentication() {
    let (mut engine, _store) = setup_anonymous("noauth-options");
    let full = respond(engine.recv(request(Method::OPTIONS, "/", None)));
    assert_eq!(full.status(), StatusCode::OK);
    assert!(full.headers().get(ALLOW).is_some());
}

#[test]
fn closed_engine_ignores_further_messages() {
    let (mut engine, _store) = setup("closed");
    let full = respond(engine.recv(request(Method::GET, "/items/missing", None)));
    assert_eq!(full.status(), StatusCode::NOT_FOUND);
    assert!(engine.is_closed());
    assert!(engine.recv(request(Method::GET, "/items", None)).is_empty());
}
