//! Request-time services over the frozen registry: collections, resources and body validation.

mod collection;
mod query;
mod resource;
mod validation;

pub use collection::{child, ChildTarget, Collection};
pub use query::{parse_query, ListParams, QueryFilter, QueryOp, SortDirection};
pub use resource::{Resource, ResourceService};
pub use validation::RequestValidator;
