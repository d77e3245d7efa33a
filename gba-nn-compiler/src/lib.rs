//! Neural-network graph compiler for single-buffer embedded targets.
//!
//! Loads a quantized graph description, fuses dense/quantize chains, plans
//! one scratch buffer for every activation and emits C that calls into a
//! fixed kernel library.

pub mod codegen;
pub mod config;
pub mod error;
pub mod export;
pub mod ir;
pub mod memory;
pub mod parse;
pub mod passes;
pub mod quant;
pub mod schedule;

pub use config::{AllocStrategy, ElemType, ExportConfig};
pub use error::{Diagnostic, Diagnostics, Error, Result};
pub use export::{compile, export, Compiled, ExportReport};
