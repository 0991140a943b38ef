//! HTTP handlers for resource collections, resources and their children.

pub mod resource;
pub use resource::*;
