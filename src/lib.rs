//! Resource SDK: declarative REST resources from a YAML or JSON configuration.
//!
//! A configuration names entity types, attributes, children and actions. Loading it resolves
//! every symbolic reference (entity types, validators, handlers, inline lambdas) into a frozen
//! [`RegistryContext`]; the request-time services and the axum routes serve from that registry.

pub mod attribute;
pub mod auth;
pub mod builtins;
pub mod config;
pub mod entity;
pub mod error;
pub mod expr;
pub mod extractors;
pub mod handlers;
pub mod registry;
pub mod resolver;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod state;
pub mod store;
pub mod transforms;
pub mod validators;

pub use attribute::{AttributeSpec, DynamicParam};
pub use auth::{AuthContext, AuthDecision, MemorySessions, Session, SessionLookup};
pub use config::{load_document, load_from_path, load_from_str, ActionSpec, ChildSpec, ResourceSchema};
pub use entity::{EntityCatalog, EntityType, Module, ModuleCatalog, Record};
pub use error::{ConfigError, ResourceException};
pub use expr::{Callable, NativeFunction, Term};
pub use registry::{RegistryBuilder, RegistryContext};
pub use resolver::{resolve, SymbolResolver};
pub use response::{success_many, success_one, success_one_ok};
pub use routes::{common_routes, resource_routes};
pub use service::{Collection, RequestValidator, Resource, ResourceService};
pub use settings::Settings;
pub use state::AppState;
pub use store::{Constraint, MemoryStore, Storage};
pub use validators::{FieldContext, Validate};
