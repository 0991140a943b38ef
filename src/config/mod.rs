pub mod types;
pub mod loader;
pub mod validator;
pub mod resolved;
pub mod relations;
pub mod parser;

pub use types::*;
pub use loader::*;
pub use resolved::*;
pub use parser::SchemaParser;
