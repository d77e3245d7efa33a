//! Codegen plan IR
//!
//! One `LayerPlan` per exported node, in schedule order:
//! 1. **Placement**: where the layer reads and writes (graph boundary pointer
//!    or scratch buffer offset)
//! 2. **Layer**: operator-specific parameters (sizes, weights, requantization)
//!
//! Produced by `lower()`, consumed by `render()`.

use crate::ir::{NodeId, TensorData};
use crate::quant::Requant;

/// Whether a layer reads the caller's input pointer and/or writes the
/// caller's output pointer instead of the scratch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPosition {
    First,
    Last,
    Between,
    Both,
}

impl CallPosition {
    pub fn new(reads_input: bool, writes_output: bool) -> Self {
        match (reads_input, writes_output) {
            (true, true) => CallPosition::Both,
            (true, false) => CallPosition::First,
            (false, true) => CallPosition::Last,
            (false, false) => CallPosition::Between,
        }
    }

    pub fn reads_input(self) -> bool {
        matches!(self, CallPosition::First | CallPosition::Both)
    }

    pub fn writes_output(self) -> bool {
        matches!(self, CallPosition::Last | CallPosition::Both)
    }
}

/// `#define NAME value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Define {
    pub name: String,
    pub value: i64,
}

/// A constant array baked into a parameter header.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstArray {
    pub data: TensorData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseParams {
    pub in_features: usize,
    pub out_features: usize,
    /// Row-major `[out_features][in_features]`.
    pub weights: ConstArray,
    pub biases: ConstArray,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Relu {
        size: usize,
    },
    Dense(DenseParams),
    /// `requant` is `None` when scales were missing or unusable; the layer
    /// then renders as the unquantized dense call.
    QuantizedDense {
        dense: DenseParams,
        requant: Option<Requant>,
        output_zero_point: Option<i64>,
        fused_relu: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerPlan {
    pub node: NodeId,
    /// Upper-case C identifier prefix for this layer's constants.
    pub symbol: String,
    pub position: CallPosition,
    pub input_offset: usize,
    pub output_offset: usize,
    pub layer: Layer,
}

/// Complete codegen plan for a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CodegenPlan {
    pub buffer_size: usize,
    pub layers: Vec<LayerPlan>,
}
