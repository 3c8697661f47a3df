//! HTTP gateway request-handling kernel.
//!
//! This crate is the per-connection core of a gateway framework. It sits
//! *above* an HTTP codec: the codec delivers parsed request heads and body
//! chunks as [`codec::HttpMessage`] values, and the engines here turn them
//! into dispatched application actions and full responses with correct
//! keep-alive lifecycle, cookie propagation and session continuity.
//!
//! Two engines share the plumbing:
//!
//! - [`page::PageEngine`] binds URL paths to declarative *pages* whose
//!   fields describe where each parameter is extracted from.
//! - [`rest::RestEngine`] binds base URIs to *method handlers*; bodies are
//!   JSON documents or multipart form data, and data-model handlers
//!   implement CRUD against an external persistence layer.
//!
//! # Quick start
//!
//! ```ignore
//! use torii::config::GatewayConfig;
//! use torii::page::{PageEngine, PageRegistry};
//!
//! let config = GatewayConfig::default();
//! let factory = config.initialize()?;
//! let registry = PageRegistry::builder()
//!     .page(my_page)
//!     .error_page(400, bad_request_page)
//!     .build();
//!
//! let mut engine = PageEngine::activate(config, registry, factory, hooks, remote);
//! for msg in messages {
//!     for action in engine.recv(msg) {
//!         // write the action back through the codec
//!     }
//! }
//! engine.inactivate();
//! ```
#![warn(missing_debug_implementations)]

mod log;

pub mod codec;
pub mod config;
pub mod cookie;
pub mod error;
pub mod response;
pub mod session;

pub mod multipart;

pub mod page;
pub mod rest;

pub mod connection;

// ===== Reexports =====

pub use codec::{Action, BodyChunk, FullResponse, HttpMessage, RequestHead};
pub use config::GatewayConfig;
pub use error::HttpError;
pub use session::Session;
