//! The REST engine: base URIs bound to method handlers.
mod argument;
mod data;
mod engine;
mod handler;
mod root;

pub use argument::{JSON_ID, JSON_PATH, RestArgument, X_ALLOW_URIS, X_DETAILED_ALLOW};
pub use data::{DataItem, DataModel, DataModelHandler, UpdatedInfo};
pub use engine::{DefaultRestHooks, RestEngine, RestHooks};
pub use handler::{CommandType, RestConfiguration, RestConfigurationBuilder, RestHandler};
pub use root::RootOptionsHandler;
