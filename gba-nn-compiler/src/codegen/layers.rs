//! Per-layer code fragments: kernel calls, defines and parameter arrays.

use super::plan::{ConstArray, Define, Layer, LayerPlan};
use super::tensor_expr::TensorExprWriter;

/// A constant array to place in the layer's parameter header.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamArray<'p> {
    /// Array identifier, e.g. `FC1_weights`.
    pub name: String,
    /// Length define, e.g. `FC1_WEIGHTS_LEN`.
    pub len_define: String,
    pub array: &'p ConstArray,
}

impl LayerPlan {
    /// Buffer indices first, then the layer's own constants.
    pub fn defines(&self, w: &TensorExprWriter) -> Vec<Define> {
        let define = |suffix: &str, value: i64| Define {
            name: w.constant(self, suffix),
            value,
        };
        let mut defines = vec![
            define("INPUT_IDX", self.input_offset as i64),
            define("OUTPUT_IDX", self.output_offset as i64),
        ];
        match &self.layer {
            Layer::Relu { size } => defines.push(define("SIZE", *size as i64)),
            Layer::Dense(dense) => {
                defines.push(define("IN_SIZE", dense.in_features as i64));
                defines.push(define("OUT_SIZE", dense.out_features as i64));
            }
            Layer::QuantizedDense {
                dense,
                requant,
                output_zero_point,
                ..
            } => {
                defines.push(define("IN_SIZE", dense.in_features as i64));
                defines.push(define("OUT_SIZE", dense.out_features as i64));
                if let Some(rq) = requant {
                    defines.push(define("MULTIPLIER", i64::from(rq.multiplier)));
                    defines.push(define("SHIFT", i64::from(rq.shift)));
                }
                if let Some(zp) = output_zero_point {
                    defines.push(define("OUTPUT_ZERO_POINT", *zp));
                }
            }
        }
        defines
    }

    /// Kernel call statements, without indentation.
    pub fn calls(&self, w: &TensorExprWriter) -> Vec<String> {
        let input = w.read(self);
        let output = w.write(self);
        match &self.layer {
            Layer::Relu { .. } => vec![format!(
                "{}({input}, {output}, {});",
                w.kernel("relu"),
                w.constant(self, "SIZE")
            )],
            Layer::Dense(_) => vec![self.dense_call(w, "fc", &input, &output, false)],
            Layer::QuantizedDense {
                requant: Some(_),
                fused_relu,
                ..
            } => {
                let kernel = if *fused_relu { "qgemm_relu" } else { "qgemm" };
                vec![self.dense_call(w, kernel, &input, &output, true)]
            }
            Layer::QuantizedDense {
                requant: None,
                fused_relu,
                ..
            } => {
                let mut calls = vec![self.dense_call(w, "fc", &input, &output, false)];
                if *fused_relu {
                    calls.push(format!(
                        "{}({output}, {output}, {});",
                        w.kernel("relu"),
                        w.constant(self, "OUT_SIZE")
                    ));
                }
                calls
            }
        }
    }

    fn dense_call(
        &self,
        w: &TensorExprWriter,
        kernel: &str,
        input: &str,
        output: &str,
        requantize: bool,
    ) -> String {
        let mut args = vec![
            input.to_string(),
            output.to_string(),
            w.array(self, "weights"),
            w.array(self, "biases"),
            w.constant(self, "IN_SIZE"),
            w.constant(self, "OUT_SIZE"),
        ];
        if requantize {
            args.push(w.constant(self, "MULTIPLIER"));
            args.push(w.constant(self, "SHIFT"));
        }
        format!("{}({});", w.kernel(kernel), args.join(", "))
    }

    /// Parameter arrays, empty for layers without weights.
    pub fn params(&self, w: &TensorExprWriter) -> Vec<ParamArray<'_>> {
        let dense = match &self.layer {
            Layer::Relu { .. } => return Vec::new(),
            Layer::Dense(dense) | Layer::QuantizedDense { dense, .. } => dense,
        };
        vec![
            ParamArray {
                name: w.array(self, "weights"),
                len_define: w.constant(self, "WEIGHTS_LEN"),
                array: &dense.weights,
            },
            ParamArray {
                name: w.array(self, "biases"),
                len_define: w.constant(self, "BIASES_LEN"),
                array: &dense.biases,
            },
        ]
    }

    /// File name of the parameter header, if the layer has one.
    pub fn params_header(&self) -> Option<String> {
        match self.layer {
            Layer::Relu { .. } => None,
            _ => Some(format!("{}_params.h", self.symbol.to_lowercase())),
        }
    }
}
