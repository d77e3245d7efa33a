//! Hand-built graphs for unit tests.

use super::{Attributes, AttrValue, DType, Dim, Graph, NodeId, OpKind, TensorData, TensorId, TensorKind};

pub(crate) struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    fn shape(dims: &[usize]) -> Option<Vec<Dim>> {
        Some(dims.iter().map(|&d| Dim::Known(d)).collect())
    }

    pub fn input(&mut self, name: &str, dims: &[usize]) -> TensorId {
        let id = self
            .graph
            .add_tensor(name, Self::shape(dims), DType::I8, TensorKind::Input);
        self.graph.inputs.push(id);
        id
    }

    pub fn output(&mut self, name: &str, dims: &[usize]) -> TensorId {
        let id = self
            .graph
            .add_tensor(name, Self::shape(dims), DType::I8, TensorKind::Output);
        self.graph.outputs.push(id);
        id
    }

    pub fn tensor(&mut self, name: &str, dims: &[usize]) -> TensorId {
        self.graph
            .add_tensor(name, Self::shape(dims), DType::I8, TensorKind::Intermediate)
    }

    pub fn float_tensor(&mut self, name: &str, dims: &[usize]) -> TensorId {
        self.graph
            .add_tensor(name, Self::shape(dims), DType::F32, TensorKind::Intermediate)
    }

    pub fn symbolic(&mut self, name: &str, dims: Vec<Dim>) -> TensorId {
        self.graph
            .add_tensor(name, Some(dims), DType::I8, TensorKind::Intermediate)
    }

    pub fn constant(&mut self, name: &str, dims: &[usize], data: TensorData) -> TensorId {
        let dtype = data.dtype();
        self.graph
            .add_tensor(name, Self::shape(dims), dtype, TensorKind::Constant(data))
    }

    pub fn scale(&mut self, name: &str, value: f32) -> TensorId {
        self.constant(name, &[], TensorData::F32(vec![value]))
    }

    pub fn zero_point(&mut self, name: &str, value: i8) -> TensorId {
        self.constant(name, &[], TensorData::I8(vec![value]))
    }

    pub fn node(&mut self, name: &str, op: OpKind, inputs: &[TensorId], outputs: &[TensorId]) -> NodeId {
        self.node_with_attrs(name, op, inputs, outputs, &[])
    }

    pub fn node_with_attrs(
        &mut self,
        name: &str,
        op: OpKind,
        inputs: &[TensorId],
        outputs: &[TensorId],
        attrs: &[(&str, AttrValue)],
    ) -> NodeId {
        let attrs: Attributes = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.graph
            .add_node(name, op, inputs.to_vec(), outputs.to_vec(), attrs)
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

/// `x -> relu -> t1 -> relu -> ... -> y`, every activation `width` bytes.
pub(crate) fn relu_chain(len: usize, width: usize) -> Graph {
    let mut b = GraphBuilder::new();
    let mut prev = b.input("x", &[1, width]);
    for i in 0..len {
        let next = if i + 1 == len {
            b.output("y", &[1, width])
        } else {
            b.tensor(&format!("t{i}"), &[1, width])
        };
        b.node(&format!("relu{i}"), OpKind::Relu, &[prev], &[next]);
        prev = next;
    }
    b.build()
}

/// Two branches off one input joined by a two-input node.
pub(crate) fn diamond(width: usize) -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, width]);
    let l = b.tensor("left", &[1, width]);
    let r = b.tensor("right", &[1, width]);
    let j = b.tensor("joined", &[1, width]);
    let y = b.output("y", &[1, width]);
    b.node("l", OpKind::Relu, &[x], &[l]);
    b.node("r", OpKind::Relu, &[x], &[r]);
    b.node("join", OpKind::Other("Add".into()), &[l, r], &[j]);
    b.node("tail", OpKind::Relu, &[j], &[y]);
    b.build()
}

/// One input read by `fan` nodes whose outputs all leave the graph.
pub(crate) fn fan_out(fan: usize, width: usize) -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, width]);
    for i in 0..fan {
        let y = b.output(&format!("y{i}"), &[1, width]);
        b.node(&format!("branch{i}"), OpKind::Relu, &[x], &[y]);
    }
    b.build()
}

/// Skip connections: every node reads the previous two activations.
pub(crate) fn ladder(len: usize, width: usize) -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, width]);
    let mut older = x;
    let mut newer = b.tensor("s0", &[1, width]);
    b.node("n0", OpKind::Relu, &[x], &[newer]);
    for i in 1..len {
        let next = if i + 1 == len {
            b.output("y", &[1, width])
        } else {
            b.tensor(&format!("s{i}"), &[1, width])
        };
        b.node(&format!("n{i}"), OpKind::Other("Add".into()), &[older, newer], &[next]);
        older = newer;
        newer = next;
    }
    b.build()
}

/// Deterministic family of graphs for property-style checks, all with
/// uniform activation size.
pub(crate) fn families() -> Vec<(String, Graph)> {
    let mut out = Vec::new();
    for len in 1..=6 {
        out.push((format!("chain{len}"), relu_chain(len, 16)));
    }
    for width in [1, 7, 64] {
        out.push((format!("diamond{width}"), diamond(width)));
    }
    for fan in 1..=4 {
        out.push((format!("fan{fan}"), fan_out(fan, 8)));
    }
    for len in 2..=6 {
        out.push((format!("ladder{len}"), ladder(len, 12)));
    }
    out
}

/// `x -> ... -> y` where tensor `i` holds `sizes[i]` bytes.
pub(crate) fn mixed_chain(sizes: &[usize]) -> Graph {
    let mut b = GraphBuilder::new();
    let last = sizes.len() - 1;
    let mut prev = b.input("x", &[1, sizes[0]]);
    for (i, &size) in sizes.iter().enumerate().skip(1) {
        let next = if i == last {
            b.output("y", &[1, size])
        } else {
            b.tensor(&format!("t{i}"), &[1, size])
        };
        b.node(&format!("op{i}"), OpKind::Other("Resize".into()), &[prev], &[next]);
        prev = next;
    }
    b.build()
}

/// Diamond with sizes `[x, left, right, joined, y]`.
pub(crate) fn mixed_diamond(sizes: [usize; 5]) -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("x", &[1, sizes[0]]);
    let l = b.tensor("left", &[1, sizes[1]]);
    let r = b.tensor("right", &[1, sizes[2]]);
    let j = b.tensor("joined", &[1, sizes[3]]);
    let y = b.output("y", &[1, sizes[4]]);
    b.node("l", OpKind::Other("Resize".into()), &[x], &[l]);
    b.node("r", OpKind::Other("Resize".into()), &[x], &[r]);
    b.node("join", OpKind::Other("Concat".into()), &[l, r], &[j]);
    b.node("tail", OpKind::Other("Resize".into()), &[j], &[y]);
    b.build()
}

/// Ladder where activation `i` holds `sizes[i]` bytes; each node reads the
/// previous two activations.
pub(crate) fn mixed_ladder(sizes: &[usize]) -> Graph {
    let mut b = GraphBuilder::new();
    let last = sizes.len() - 1;
    let x = b.input("x", &[1, sizes[0]]);
    let mut older = x;
    let mut newer = b.tensor("s1", &[1, sizes[1]]);
    b.node("n1", OpKind::Other("Resize".into()), &[x], &[newer]);
    for (i, &size) in sizes.iter().enumerate().skip(2) {
        let next = if i == last {
            b.output("y", &[1, size])
        } else {
            b.tensor(&format!("s{i}"), &[1, size])
        };
        b.node(&format!("n{i}"), OpKind::Other("Concat".into()), &[older, newer], &[next]);
        older = newer;
        newer = next;
    }
    b.build()
}

/// Graphs with uneven activation sizes, so freed blocks are smaller or
/// larger than the next birth and best-fit has to split and merge.
pub(crate) fn mixed_families() -> Vec<(String, Graph)> {
    const SIZES: [usize; 5] = [3, 17, 1, 64, 5];
    let mut out = Vec::new();
    for rot in 0..SIZES.len() {
        let mut sizes = SIZES;
        sizes.rotate_left(rot);
        out.push((format!("mixed_chain_rot{rot}"), mixed_chain(&sizes)));
        out.push((format!("mixed_diamond_rot{rot}"), mixed_diamond(sizes)));
        out.push((format!("mixed_ladder_rot{rot}"), mixed_ladder(&sizes)));

        let mut reversed = sizes;
        reversed.reverse();
        out.push((format!("mixed_chain_rev{rot}"), mixed_chain(&reversed)));
        out.push((format!("mixed_ladder_rev{rot}"), mixed_ladder(&reversed)));
    }
    // Large, small, large: the small block freed between two large ones.
    let zigzag = [64, 1, 64, 2, 48, 1, 17, 3, 64];
    out.push(("mixed_chain_zigzag".into(), mixed_chain(&zigzag)));
    out.push(("mixed_ladder_zigzag".into(), mixed_ladder(&zigzag)));
    out
}
