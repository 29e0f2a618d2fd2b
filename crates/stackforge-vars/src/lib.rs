//! StackForge Variable Store
//!
//! Typed key/value configuration for a deployment:
//! - Declared once with a type, scope, default and validator
//! - Values coerced from strings so CLI and TOML input flow straight in
//! - Stack-scoped reads fall back to the global value, then the default
//! - Reads served from a bounded TTL cache; writes invalidate one key
//!
//! # Example
//!
//! ```rust,ignore
//! let store = VariableStore::new();
//! register_deployment_variables(&store)?;
//!
//! store.set("region", "eu-west-1", Scope::Stack)?;
//! let region = store.get_string("region", Scope::Stack)?;
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod standard;
pub mod store;
pub mod validators;
pub mod value;

pub use error::{Result, VariableError};
pub use standard::{register_deployment_variables, names};
pub use store::{VariableDecl, VariableStore};
pub use validators::Validator;
pub use value::{Scope, VarType, VarValue};
