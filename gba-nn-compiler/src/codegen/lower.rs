use std::collections::HashSet;

use crate::error::{Diagnostic, Diagnostics, Error, Result};
use crate::ir::{element_count, Dim, Graph, Node, OpKind, QuantSlots, TensorData, TensorId};
use crate::memory::{Classification, MemoryPlan, Placement, SkipReason};
use crate::quant::Requant;
use crate::schedule::Schedule;

use super::plan::*;
use super::tensor_expr::symbol_name;

/// Everything lowering reads besides the graph itself.
pub struct LowerInputs<'a> {
    pub schedule: &'a Schedule,
    pub classification: &'a Classification,
    pub memory: &'a MemoryPlan,
    /// Scratch buffer identifier; its upper-case form is reserved for the
    /// buffer size define.
    pub buffer_name: &'a str,
}

/**
 * Lower a scheduled, fused, allocated graph into a CodegenPlan.
 *
 * Nodes are resolved through the operator registry in schedule order; kinds
 * without an exporter are reported and skipped.
 */
pub fn lower(graph: &Graph, inputs: &LowerInputs, diagnostics: &mut Diagnostics) -> Result<CodegenPlan> {
    let mut layers = Vec::new();
    let mut symbols = HashSet::from([inputs.buffer_name.to_uppercase()]);

    for (pos, &id) in inputs.schedule.order.iter().enumerate() {
        let node = graph.node(id);
        let layer = match &node.op {
            OpKind::Relu => lower_relu(graph, node)?,
            OpKind::Gemm => Layer::Dense(lower_dense(graph, node, node.inputs.len())?),
            OpKind::QGemm(slots) => lower_qgemm(graph, node, slots, false, diagnostics)?,
            OpKind::QGemmRelu(slots) => lower_qgemm(graph, node, slots, true, diagnostics)?,
            OpKind::DequantizeLinear if folds_into_rom(node, inputs.classification) => {
                log::debug!("{} folds into a constant, nothing to emit", node.display_name());
                continue;
            }
            other => {
                diagnostics.push(Diagnostic::UnsupportedOperator {
                    node: node.display_name(),
                    op_type: other.op_type().to_string(),
                });
                continue;
            }
        };

        let (input, output) = boundary_tensors(node)?;
        let position = CallPosition::new(graph.is_input(input), graph.is_output(output));
        let input_offset = operand_offset(graph, inputs, input)?;
        let output_offset = operand_offset(graph, inputs, output)?;

        let symbol = unique_symbol(&mut symbols, symbol_name(&node.name, node.op.op_type(), pos), pos);
        log::debug!("layer {symbol}: {} at {:?}", node.op, position);

        layers.push(LayerPlan {
            node: id,
            symbol,
            position,
            input_offset,
            output_offset,
            layer,
        });
    }

    Ok(CodegenPlan {
        buffer_size: inputs.memory.total_size,
        layers,
    })
}

/// `base`, else `base_{pos}`, else `base_{pos}_1`, `base_{pos}_2`, ...
fn unique_symbol(taken: &mut HashSet<String>, base: String, pos: usize) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let suffixed = format!("{base}_{pos}");
    let mut candidate = suffixed.clone();
    let mut n = 0;
    while !taken.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{suffixed}_{n}");
    }
    candidate
}

fn folds_into_rom(node: &Node, classification: &Classification) -> bool {
    node.outputs.iter().all(|&t| classification.is_rom(t))
}

fn boundary_tensors(node: &Node) -> Result<(TensorId, TensorId)> {
    match (node.inputs.first(), node.outputs.first()) {
        (Some(&input), Some(&output)) => Ok((input, output)),
        _ => Err(Error::InvalidGraph(format!(
            "node '{}' needs at least one input and one output",
            node.display_name()
        ))),
    }
}

/// Graph boundary tensors are passed by pointer; their offset is only
/// informative. Everything else must have a region in the buffer.
fn operand_offset(graph: &Graph, inputs: &LowerInputs, tensor: TensorId) -> Result<usize> {
    if let Some(offset) = inputs.memory.offset(tensor) {
        return Ok(offset);
    }
    if graph.is_input(tensor) || graph.is_output(tensor) {
        return Ok(0);
    }
    let name = graph.tensor(tensor).name.clone();
    match inputs.classification.placement(tensor) {
        Some(Placement::Skipped(reason)) => Err(Error::MissingShape {
            tensor: name,
            dim: match reason {
                SkipReason::SymbolicDim(dim) => dim.clone(),
                SkipReason::NoShape => "unknown".to_string(),
            },
        }),
        _ => Err(Error::Unallocated { tensor: name }),
    }
}

/// Features per sample: all dims after the batch dim, or the only dim.
fn feature_count(graph: &Graph, tensor: TensorId) -> Result<usize> {
    let t = graph.tensor(tensor);
    let Some(shape) = &t.shape else {
        return Err(Error::MissingShape {
            tensor: t.name.clone(),
            dim: "unknown".to_string(),
        });
    };
    let features: &[Dim] = if shape.len() > 1 { &shape[1..] } else { shape };
    element_count(features).map_err(|dim| Error::MissingShape {
        tensor: t.name.clone(),
        dim: dim.to_string(),
    })
}

fn lower_relu(graph: &Graph, node: &Node) -> Result<Layer> {
    let (input, _) = boundary_tensors(node)?;
    Ok(Layer::Relu {
        size: feature_count(graph, input)?,
    })
}

/// A constant operand, possibly behind a dequantize node, and the scale
/// that dequantize applies.
struct ResolvedConstant<'g> {
    data: &'g TensorData,
    shape: Vec<usize>,
    scale: Option<f64>,
}

fn resolve_constant(graph: &Graph, tensor: TensorId) -> Option<ResolvedConstant<'_>> {
    let known = |id: TensorId| -> Option<Vec<usize>> {
        graph
            .tensor(id)
            .shape
            .as_ref()?
            .iter()
            .map(|d| match d {
                Dim::Known(n) => Some(*n),
                Dim::Symbolic(_) => None,
            })
            .collect()
    };

    if let Some(data) = graph.tensor(tensor).data() {
        return Some(ResolvedConstant {
            data,
            shape: known(tensor)?,
            scale: None,
        });
    }
    let producer = graph.producer(tensor)?;
    if producer.op != OpKind::DequantizeLinear {
        return None;
    }
    let &source = producer.inputs.first()?;
    Some(ResolvedConstant {
        data: graph.tensor(source).data()?,
        shape: known(source)?,
        scale: producer.inputs.get(1).and_then(|&s| scalar(graph, s)),
    })
}

fn scalar(graph: &Graph, tensor: TensorId) -> Option<f64> {
    graph.tensor(tensor).data()?.scalar()
}

fn transpose<T: Copy>(values: &[T], rows: usize, cols: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for c in 0..cols {
        for r in 0..rows {
            out.push(values[r * cols + c]);
        }
    }
    out
}

fn transpose_data(data: &TensorData, rows: usize, cols: usize) -> TensorData {
    match data {
        TensorData::F32(v) => TensorData::F32(transpose(v, rows, cols)),
        TensorData::I32(v) => TensorData::I32(transpose(v, rows, cols)),
        TensorData::I64(v) => TensorData::I64(transpose(v, rows, cols)),
        TensorData::I8(v) => TensorData::I8(transpose(v, rows, cols)),
        TensorData::U8(v) => TensorData::U8(transpose(v, rows, cols)),
    }
}

/// Dense parameters from the first `dense_inputs` operands (activation,
/// weights, optional bias). Weights come out as `[out][in]`.
fn lower_dense(graph: &Graph, node: &Node, dense_inputs: usize) -> Result<DenseParams> {
    let (input, output) = boundary_tensors(node)?;
    let in_features = feature_count(graph, input)?;
    let out_features = feature_count(graph, output)?;
    let name = node.display_name();

    let weights_id = node
        .inputs
        .get(1)
        .filter(|_| dense_inputs > 1)
        .copied()
        .ok_or_else(|| Error::InvalidGraph(format!("dense node '{name}' has no weights")))?;
    let weights = resolve_constant(graph, weights_id).ok_or_else(|| {
        Error::InvalidGraph(format!(
            "weights '{}' of node '{name}' are not a constant",
            graph.tensor(weights_id).name
        ))
    })?;
    if weights.data.len() != in_features * out_features || weights.shape.len() != 2 {
        return Err(Error::InvalidGraph(format!(
            "weights of node '{name}' have shape {:?}, expected {out_features}x{in_features}",
            weights.shape
        )));
    }
    let weights = if node.int_attr("transB") == Some(1) {
        weights.data.clone()
    } else {
        transpose_data(weights.data, in_features, out_features)
    };

    let biases = match node.inputs.get(2).filter(|_| dense_inputs > 2) {
        Some(&bias_id) => {
            let bias = resolve_constant(graph, bias_id).ok_or_else(|| {
                Error::InvalidGraph(format!("bias of node '{name}' is not a constant"))
            })?;
            if bias.data.len() != out_features {
                return Err(Error::InvalidGraph(format!(
                    "bias of node '{name}' has {} values, expected {out_features}",
                    bias.data.len()
                )));
            }
            bias.data.clone()
        }
        None => TensorData::I32(vec![0; out_features]),
    };

    Ok(DenseParams {
        in_features,
        out_features,
        weights: ConstArray { data: weights },
        biases: ConstArray { data: biases },
    })
}

/// Scale of the activation feeding `node`, read from whatever dequantized it.
fn input_scale(graph: &Graph, node: &Node) -> Option<f64> {
    let producer = graph.producer(*node.inputs.first()?)?;
    match &producer.op {
        OpKind::DequantizeLinear => scalar(graph, *producer.inputs.get(1)?),
        OpKind::QGemm(slots) | OpKind::QGemmRelu(slots) => {
            scalar(graph, producer.inputs[slots.dequant_scale?])
        }
        _ => None,
    }
}

fn lower_qgemm(
    graph: &Graph,
    node: &Node,
    slots: &QuantSlots,
    fused_relu: bool,
    diagnostics: &mut Diagnostics,
) -> Result<Layer> {
    let dense = lower_dense(graph, node, slots.dense_inputs)?;
    let name = node.display_name();
    let slot_scalar = |slot: Option<usize>| slot.and_then(|s| scalar(graph, node.inputs[s]));

    let weight_scale = node
        .inputs
        .get(1)
        .and_then(|&w| resolve_constant(graph, w))
        .and_then(|w| w.scale);
    // The bias is quantized with `input_scale * weight_scale`; use it when
    // either factor is unknown.
    let bias_scale = node
        .inputs
        .get(2)
        .filter(|_| slots.dense_inputs > 2)
        .and_then(|&b| resolve_constant(graph, b))
        .and_then(|b| b.scale);
    let scales = match (input_scale(graph, node), weight_scale, bias_scale) {
        (Some(i), Some(w), _) => Some((i, w)),
        (_, _, Some(b)) => Some((b, 1.0)),
        (None, _, None) => {
            diagnostics.push(Diagnostic::MissingQuantizationParameter {
                node: name.clone(),
                parameter: "input scale",
            });
            None
        }
        (Some(_), None, None) => {
            diagnostics.push(Diagnostic::MissingQuantizationParameter {
                node: name.clone(),
                parameter: "weight scale",
            });
            None
        }
    };
    let output_scale = slot_scalar(slots.output_scale);
    if scales.is_some() && output_scale.is_none() {
        diagnostics.push(Diagnostic::MissingQuantizationParameter {
            node: name.clone(),
            parameter: "output scale",
        });
    }

    let requant = match (scales, output_scale) {
        (Some((i, w)), Some(o)) => match Requant::from_scales(i, w, o) {
            Ok(rq) => Some(rq),
            Err(err) => {
                diagnostics.push(Diagnostic::InvalidRequantization {
                    node: name,
                    reason: err.to_string(),
                });
                None
            }
        },
        _ => None,
    };

    Ok(Layer::QuantizedDense {
        dense,
        requant,
        output_zero_point: slot_scalar(slots.output_zero_point).map(|zp| zp as i64),
        fused_relu,
    })
}
