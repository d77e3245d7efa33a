//! Operator kinds understood by the compiler.
//! Fused kinds are produced by the rewrite passes; everything the loader does
//! not recognise is kept as `Other` and skipped at export time.

use std::fmt;

/// Where the requantization operands of a fused dense node sit in its input
/// list. Slots before `dense_inputs` are the original dense operands
/// (activation, weights, optional bias).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuantSlots {
    pub dense_inputs: usize,
    pub output_scale: Option<usize>,
    pub output_zero_point: Option<usize>,
    pub dequant_scale: Option<usize>,
    pub dequant_zero_point: Option<usize>,
}

impl QuantSlots {
    /// Layout of a fused node stored with all four quantization operands
    /// appended after the dense operands.
    pub fn packed(input_count: usize) -> Self {
        if input_count < 6 {
            return Self {
                dense_inputs: input_count,
                ..Self::default()
            };
        }
        let dense = input_count - 4;
        Self {
            dense_inputs: dense,
            output_scale: Some(dense),
            output_zero_point: Some(dense + 1),
            dequant_scale: Some(dense + 2),
            dequant_zero_point: Some(dense + 3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    Relu,
    /// Dense / matrix multiply (`Y = A * B + C`).
    Gemm,
    QuantizeLinear,
    DequantizeLinear,
    /// Gemm fused with its output quantize/dequantize round trip.
    QGemm(QuantSlots),
    /// `QGemm` fused with a trailing Relu.
    QGemmRelu(QuantSlots),
    Other(String),
}

impl OpKind {
    pub fn from_op_type(op_type: &str, input_count: usize) -> Self {
        match op_type {
            "Relu" => OpKind::Relu,
            "Gemm" => OpKind::Gemm,
            "QuantizeLinear" => OpKind::QuantizeLinear,
            "DequantizeLinear" => OpKind::DequantizeLinear,
            "QGemmCustom" => OpKind::QGemm(QuantSlots::packed(input_count)),
            "QGemmReluCustom" => OpKind::QGemmRelu(QuantSlots::packed(input_count)),
            other => OpKind::Other(other.to_string()),
        }
    }

    pub fn op_type(&self) -> &str {
        match self {
            OpKind::Relu => "Relu",
            OpKind::Gemm => "Gemm",
            OpKind::QuantizeLinear => "QuantizeLinear",
            OpKind::DequantizeLinear => "DequantizeLinear",
            OpKind::QGemm(_) => "QGemmCustom",
            OpKind::QGemmRelu(_) => "QGemmReluCustom",
            OpKind::Other(name) => name,
        }
    }

    pub fn quant_slots(&self) -> Option<&QuantSlots> {
        match self {
            OpKind::QGemm(slots) | OpKind::QGemmRelu(slots) => Some(slots),
            _ => None,
        }
    }

    /// Whether reading input `slot` keeps an activation alive. Fused quantized
    /// dense nodes only read an activation through slot 0; the rest are
    /// weights, bias and quantization constants.
    pub fn reads_activation(&self, slot: usize) -> bool {
        match self {
            OpKind::QGemm(_) | OpKind::QGemmRelu(_) => slot == 0,
            _ => true,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op_type())
    }
}
