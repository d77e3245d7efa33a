//! C code generation.
//!
//! `lower` turns a scheduled and allocated graph into a `CodegenPlan`;
//! `render` turns the plan into source and header files.

mod layers;
mod lower;
mod plan;
mod render;
mod tensor_expr;

pub use layers::ParamArray;
pub use lower::{lower, LowerInputs};
pub use plan::{CallPosition, CodegenPlan, ConstArray, Define, DenseParams, Layer, LayerPlan};
pub use render::{render, GeneratedFile};
pub use tensor_expr::{symbol_name, TensorExprWriter};
