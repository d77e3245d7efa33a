use crate::error::{Diagnostic, Diagnostics};
use crate::ir::{Graph, NodeId, OpKind};

use super::Pass;

/// Drops `QuantizeLinear -> DequantizeLinear` round trips and rewires the
/// dequantize consumers to the quantize input.
///
/// The round trip rounds and clamps; removing it changes results whenever
/// the values are not already on the quantization grid. Every fold is
/// reported as a `LossyFold` diagnostic.
pub struct QuantDequantFold;

impl QuantDequantFold {
    fn find(graph: &Graph) -> Vec<(NodeId, NodeId)> {
        graph
            .nodes()
            .filter(|n| n.op == OpKind::QuantizeLinear)
            .filter_map(|q| {
                let out = *q.outputs.first()?;
                let dq = graph
                    .sole_consumer(out)
                    .filter(|n| n.op == OpKind::DequantizeLinear)?;
                Some((q.id, dq.id))
            })
            .collect()
    }
}

impl Pass for QuantDequantFold {
    fn name(&self) -> &'static str {
        "quant-dequant-fold"
    }

    fn run(&self, graph: &mut Graph, diagnostics: &mut Diagnostics) -> usize {
        let pairs = Self::find(graph);
        let mut folded = 0;
        for &(q_id, dq_id) in &pairs {
            // Earlier folds in this run may have rewired the quantize input.
            let q = graph.node(q_id).clone();
            let dq = graph.node(dq_id).clone();
            let (Some(&source), Some(&q_out), Some(&dq_out)) =
                (q.inputs.first(), q.outputs.first(), dq.outputs.first())
            else {
                continue;
            };

            graph.remove_node(q_id);
            graph.remove_node(dq_id);
            graph.replace_uses(dq_out, source);
            graph.retire_unreferenced(&[q_out, dq_out]);

            diagnostics.push(Diagnostic::LossyFold {
                quantize: q.display_name(),
                dequantize: dq.display_name(),
            });
            folded += 1;
        }
        folded
    }
}
