//! Small helpers shared across middlewares.
//!
//! - [`path_pattern`] - exact / trailing-`*` path matching

pub mod path_pattern;
