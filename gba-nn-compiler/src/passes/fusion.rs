use crate::error::Diagnostics;
use crate::ir::{Graph, NodeId, OpKind, QuantSlots, TensorId};

use super::{merge_prefixed, Pass};

/// `Gemm -> QuantizeLinear -> DequantizeLinear` becomes one `QGemm` node.
///
/// The fused node reads the Gemm operands followed by the quantize
/// scale/zero point and the dequantize scale/zero point, and writes the
/// dequantize output so downstream wiring is untouched.
pub struct GemmQuantDequantFusion;

struct DenseChain {
    gemm: NodeId,
    quantize: NodeId,
    dequantize: NodeId,
}

impl GemmQuantDequantFusion {
    fn find(graph: &Graph) -> Vec<DenseChain> {
        let mut found = Vec::new();
        for gemm in graph.nodes().filter(|n| n.op == OpKind::Gemm) {
            let Some(&out) = gemm.outputs.first() else {
                continue;
            };
            let Some(q) = graph
                .sole_consumer(out)
                .filter(|n| n.op == OpKind::QuantizeLinear)
            else {
                continue;
            };
            let Some(&q_out) = q.outputs.first() else {
                continue;
            };
            let Some(dq) = graph
                .sole_consumer(q_out)
                .filter(|n| n.op == OpKind::DequantizeLinear)
            else {
                continue;
            };
            found.push(DenseChain {
                gemm: gemm.id,
                quantize: q.id,
                dequantize: dq.id,
            });
        }
        found
    }

    fn fuse(graph: &mut Graph, chain: &DenseChain) {
        let gemm = graph.node(chain.gemm).clone();
        let q = graph.node(chain.quantize).clone();
        let dq = graph.node(chain.dequantize).clone();

        let mut inputs = gemm.inputs.clone();
        let mut slots = QuantSlots {
            dense_inputs: inputs.len(),
            ..QuantSlots::default()
        };
        let mut append = |tensor: Option<&TensorId>| {
            tensor.map(|&t| {
                inputs.push(t);
                inputs.len() - 1
            })
        };
        slots.output_scale = append(q.inputs.get(1));
        slots.output_zero_point = append(q.inputs.get(2));
        slots.dequant_scale = append(dq.inputs.get(1));
        slots.dequant_zero_point = append(dq.inputs.get(2));

        let mut attrs = gemm.attrs.clone();
        merge_prefixed(&mut attrs, &q.attrs, "quant_");
        merge_prefixed(&mut attrs, &dq.attrs, "dequant_");

        let name = if gemm.name.is_empty() {
            "qgemm_custom_fused".to_string()
        } else {
            format!("{}_fused", gemm.name)
        };

        for id in [chain.gemm, chain.quantize, chain.dequantize] {
            graph.remove_node(id);
        }
        log::debug!(
            "fused {} -> {} -> {} into {name}",
            gemm.display_name(),
            q.display_name(),
            dq.display_name()
        );
        graph.add_node(name, OpKind::QGemm(slots), inputs, dq.outputs.clone(), attrs);

        let mut dropped = gemm.outputs;
        dropped.extend(q.outputs);
        graph.retire_unreferenced(&dropped);
    }
}

impl Pass for GemmQuantDequantFusion {
    fn name(&self) -> &'static str {
        "gemm-quant-dequant-fusion"
    }

    fn run(&self, graph: &mut Graph, _diagnostics: &mut Diagnostics) -> usize {
        let chains = Self::find(graph);
        for chain in &chains {
            Self::fuse(graph, chain);
        }
        chains.len()
    }
}

/// A fused quantized dense node followed by a Relu becomes `QGemmRelu`.
pub struct DenseActivationFusion;

impl DenseActivationFusion {
    fn find(graph: &Graph) -> Vec<(NodeId, NodeId)> {
        graph
            .nodes()
            .filter(|n| matches!(n.op, OpKind::QGemm(_)))
            .filter_map(|dense| {
                let out = *dense.outputs.first()?;
                let relu = graph.sole_consumer(out).filter(|n| n.op == OpKind::Relu)?;
                Some((dense.id, relu.id))
            })
            .collect()
    }
}

impl Pass for DenseActivationFusion {
    fn name(&self) -> &'static str {
        "dense-activation-fusion"
    }

    fn run(&self, graph: &mut Graph, _diagnostics: &mut Diagnostics) -> usize {
        let pairs = Self::find(graph);
        for &(dense_id, relu_id) in &pairs {
            let dense = graph.node(dense_id).clone();
            let relu = graph.node(relu_id).clone();
            let OpKind::QGemm(slots) = dense.op else {
                continue;
            };

            let mut attrs = dense.attrs.clone();
            merge_prefixed(&mut attrs, &relu.attrs, "relu_");
            let name = if dense.name.is_empty() {
                "qgemm_relu_custom_fused".to_string()
            } else {
                format!("{}_relu_fused", dense.name)
            };

            graph.remove_node(dense_id);
            graph.remove_node(relu_id);
            log::debug!("fused {} with {} into {name}", dense.display_name(), relu.display_name());
            graph.add_node(name, OpKind::QGemmRelu(slots), dense.inputs, relu.outputs, attrs);
            graph.retire_unreferenced(&dense.outputs);
        }
        pairs.len()
    }
}
