//! Core graph types.
//!
//! Tensors and nodes live in arenas and are addressed by integer id. Names are
//! kept in a lookup table so rewrite passes can remove and append nodes
//! without chasing live references.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use super::op::OpKind;

pub type TensorId = usize;
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum DType {
    #[serde(rename = "float32", alias = "float")]
    F32,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "int64")]
    I64,
    #[serde(rename = "int8")]
    I8,
    #[serde(rename = "uint8")]
    U8,
}

impl DType {
    pub fn byte_width(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::I64 => 8,
            DType::I8 | DType::U8 => 1,
        }
    }

    /// C spelling used for constant arrays of this type.
    pub fn c_type(self) -> &'static str {
        match self {
            DType::F32 => "float",
            DType::I32 => "int32_t",
            DType::I64 => "int64_t",
            DType::I8 => "int8_t",
            DType::U8 => "uint8_t",
        }
    }
}

/// One dimension of a declared shape. Symbolic dims stay unresolved until a
/// binding replaces them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Known(usize),
    Symbolic(String),
}

pub type Shape = Vec<Dim>;

/// Product of all dims, or the first symbolic dim name if any is unresolved.
pub fn element_count(shape: &[Dim]) -> Result<usize, &str> {
    shape.iter().try_fold(1usize, |acc, dim| match dim {
        Dim::Known(n) => Ok(acc * n),
        Dim::Symbolic(name) => Err(name.as_str()),
    })
}

/// Payload of a constant tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    I8(Vec<i8>),
    U8(Vec<u8>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::I8(_) => DType::I8,
            TensorData::U8(_) => DType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First element widened to `f64`; scales and zero points are scalars.
    pub fn scalar(&self) -> Option<f64> {
        match self {
            TensorData::F32(v) => v.first().map(|&x| f64::from(x)),
            TensorData::I32(v) => v.first().map(|&x| f64::from(x)),
            TensorData::I64(v) => v.first().map(|&x| x as f64),
            TensorData::I8(v) => v.first().map(|&x| f64::from(x)),
            TensorData::U8(v) => v.first().map(|&x| f64::from(x)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorKind {
    /// Graph input - provided by caller
    Input,
    /// Graph output - returned to caller
    Output,
    /// Weights/biases/quantization params - baked into the binary
    Constant(TensorData),
    /// Activation produced and consumed inside the graph
    Intermediate,
}

#[derive(Debug, Clone)]
pub struct Tensor {
    pub id: TensorId,
    pub name: String,
    /// `None` when no shape metadata is available.
    pub shape: Option<Shape>,
    pub dtype: DType,
    pub kind: TensorKind,
    retired: bool,
}

impl Tensor {
    pub fn data(&self) -> Option<&TensorData> {
        match &self.kind {
            TensorKind::Constant(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, TensorKind::Constant(_))
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }
}

/// Scalar or list attribute attached to a node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Str(String),
}

pub type Attributes = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// May be empty for anonymous nodes.
    pub name: String,
    pub op: OpKind,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
    pub attrs: Attributes,
}

impl Node {
    pub fn int_attr(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Name for messages; anonymous nodes fall back to their op type.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("<{}#{}>", self.op, self.id)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Graph {
    tensors: Vec<Tensor>,
    names: HashMap<String, TensorId>,
    nodes: Vec<Node>,
    /// Live nodes in declaration order. Removed nodes stay in the arena.
    order: Vec<NodeId>,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        &self.tensors[id]
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut Tensor {
        &mut self.tensors[id]
    }

    pub fn tensor_id(&self, name: &str) -> Option<TensorId> {
        self.names.get(name).copied()
    }

    /// Live tensors in creation order.
    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.iter().filter(|t| !t.retired)
    }

    /// Adds a tensor, or returns the existing id if the name is already taken.
    pub fn add_tensor(
        &mut self,
        name: impl Into<String>,
        shape: Option<Shape>,
        dtype: DType,
        kind: TensorKind,
    ) -> TensorId {
        let name = name.into();
        if let Some(&id) = self.names.get(&name) {
            return id;
        }
        let id = self.tensors.len();
        self.names.insert(name.clone(), id);
        self.tensors.push(Tensor {
            id,
            name,
            shape,
            dtype,
            kind,
            retired: false,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Live nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(move |&id| &self.nodes[id])
    }

    /// Snapshot of live node ids in declaration order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.order.clone()
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Appends a node at the end of the declaration order.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op: OpKind,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
        attrs: Attributes,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            name: name.into(),
            op,
            inputs,
            outputs,
            attrs,
        });
        self.order.push(id);
        id
    }

    pub fn remove_node(&mut self, id: NodeId) {
        self.order.retain(|&n| n != id);
    }

    pub fn is_input(&self, id: TensorId) -> bool {
        self.inputs.contains(&id)
    }

    pub fn is_output(&self, id: TensorId) -> bool {
        self.outputs.contains(&id)
    }

    /// Map from every produced tensor to its producing node.
    pub fn producer_map(&self) -> HashMap<TensorId, NodeId> {
        let mut map = HashMap::new();
        for node in self.nodes() {
            for &out in &node.outputs {
                map.insert(out, node.id);
            }
        }
        map
    }

    pub fn producer(&self, tensor: TensorId) -> Option<&Node> {
        self.nodes().find(|n| n.outputs.contains(&tensor))
    }

    /// `(node, input slot)` pairs reading `tensor`, in declaration order.
    pub fn consumers(&self, tensor: TensorId) -> Vec<(NodeId, usize)> {
        let mut found = Vec::new();
        for node in self.nodes() {
            for (slot, &input) in node.inputs.iter().enumerate() {
                if input == tensor {
                    found.push((node.id, slot));
                }
            }
        }
        found
    }

    /// The only node reading `tensor`, provided it reads it through slot 0 and
    /// the tensor does not escape as a graph output.
    pub fn sole_consumer(&self, tensor: TensorId) -> Option<&Node> {
        if self.is_output(tensor) {
            return None;
        }
        match self.consumers(tensor).as_slice() {
            [(node, 0)] => Some(&self.nodes[*node]),
            _ => None,
        }
    }

    /// Rewires every node input and graph output reading `from` to `to`.
    pub fn replace_uses(&mut self, from: TensorId, to: TensorId) {
        for &id in &self.order {
            for input in self.nodes[id].inputs.iter_mut() {
                if *input == from {
                    *input = to;
                }
            }
        }
        let mut became_output = false;
        for output in self.outputs.iter_mut() {
            if *output == from {
                *output = to;
                became_output = true;
            }
        }
        if became_output && self.tensors[to].kind == TensorKind::Intermediate {
            self.tensors[to].kind = TensorKind::Output;
        }
    }

    /// Drops tensors that no live node, graph boundary or initializer table
    /// still references. Constants are kept even when unreferenced.
    pub fn retire_unreferenced(&mut self, candidates: &[TensorId]) {
        for &id in candidates {
            let tensor = &self.tensors[id];
            if tensor.retired || tensor.is_constant() || self.is_input(id) || self.is_output(id) {
                continue;
            }
            let referenced = self
                .nodes()
                .any(|n| n.inputs.contains(&id) || n.outputs.contains(&id));
            if !referenced {
                let name = self.tensors[id].name.clone();
                self.names.remove(&name);
                self.tensors[id].retired = true;
            }
        }
    }
}
