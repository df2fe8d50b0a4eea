//! Core library for `warden`.
//!
//! Contains the model parser and validator, the policy store, the role
//! manager, the matcher compiler/evaluator, the effect combiner, the
//! matcher/decision caches, and the enforcer that ties them together. This
//! crate depends on `warden-storage` for the adapter trait and knows
//! nothing about any specific storage backend.

pub mod cache;
pub mod config;
pub mod effect;
pub mod enforcer;
pub mod error;
pub mod function;
pub mod matcher;
pub mod model;
pub mod policy;
pub mod rbac;
pub mod value;
pub mod watcher;

pub use enforcer::{Enforcer, EnforcerOptions};
pub use error::EnforcerError;
pub use model::Model;
pub use value::Value;
