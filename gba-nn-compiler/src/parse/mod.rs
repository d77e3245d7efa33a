//! Model loaders.

pub mod json;
