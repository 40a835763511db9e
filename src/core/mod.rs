//! Core domain types: identifiers, script tasks, retry policy and results.

pub mod result;
pub mod retry;
pub mod script;
pub mod types;
