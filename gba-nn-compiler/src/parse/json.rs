//! JSON graph description to graph IR.
//!
//! The description is an exchange-format dump with shapes already inferred:
//! declared inputs/outputs, `value_info` for intermediates, initializers with
//! flat data, and nodes referencing tensors by name.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ir::{Attributes, DType, Dim, Graph, OpKind, Shape, TensorData, TensorId, TensorKind};

#[derive(Debug, Deserialize)]
struct ModelDesc {
    #[serde(default)]
    inputs: Vec<ValueDesc>,
    #[serde(default)]
    outputs: Vec<ValueDesc>,
    #[serde(default)]
    value_info: Vec<ValueDesc>,
    #[serde(default)]
    initializers: Vec<InitializerDesc>,
    #[serde(default)]
    nodes: Vec<NodeDesc>,
}

#[derive(Debug, Deserialize)]
struct ValueDesc {
    name: String,
    #[serde(default = "default_dtype")]
    dtype: DType,
    #[serde(default)]
    shape: Option<Shape>,
}

#[derive(Debug, Deserialize)]
struct InitializerDesc {
    name: String,
    dtype: DType,
    #[serde(default)]
    shape: Vec<usize>,
    data: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct NodeDesc {
    #[serde(default)]
    name: String,
    op_type: String,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    attributes: Attributes,
}

fn default_dtype() -> DType {
    DType::F32
}

/// Parse a graph description, binding symbolic dims named in `bindings`.
pub fn to_graph(data: &[u8], bindings: &BTreeMap<String, usize>) -> Result<Graph> {
    let desc: ModelDesc = serde_json::from_slice(data)?;
    lower(desc, bindings)
}

fn lower(desc: ModelDesc, bindings: &BTreeMap<String, usize>) -> Result<Graph> {
    let mut graph = Graph::new();

    for init in desc.initializers {
        let expected: usize = init.shape.iter().product();
        if expected != init.data.len() {
            return Err(Error::InvalidGraph(format!(
                "initializer '{}' declares {} elements but carries {}",
                init.name,
                expected,
                init.data.len()
            )));
        }
        let data = convert_data(&init.name, init.dtype, &init.data)?;
        let shape = init.shape.into_iter().map(Dim::Known).collect();
        graph.add_tensor(init.name, Some(shape), init.dtype, TensorKind::Constant(data));
    }

    // Older exchange files also list initializers as graph inputs; the
    // constant wins.
    for value in desc.inputs {
        if graph.tensor_id(&value.name).is_some() {
            continue;
        }
        let shape = value.shape.map(|s| bind_dims(s, bindings));
        let id = graph.add_tensor(value.name, shape, value.dtype, TensorKind::Input);
        graph.inputs.push(id);
    }

    for value in desc.outputs {
        if let Some(existing) = graph.tensor_id(&value.name) {
            if graph.is_input(existing) || graph.tensor(existing).is_constant() {
                return Err(Error::InvalidGraph(format!(
                    "graph output '{}' is also an input or initializer",
                    value.name
                )));
            }
        }
        let shape = value.shape.map(|s| bind_dims(s, bindings));
        let id = graph.add_tensor(value.name, shape, value.dtype, TensorKind::Output);
        graph.outputs.push(id);
    }

    for value in desc.value_info {
        if graph.tensor_id(&value.name).is_some() {
            continue;
        }
        let shape = value.shape.map(|s| bind_dims(s, bindings));
        graph.add_tensor(value.name, shape, value.dtype, TensorKind::Intermediate);
    }

    let produced: HashSet<&str> = desc
        .nodes
        .iter()
        .flat_map(|n| n.outputs.iter().map(String::as_str))
        .filter(|name| !name.is_empty())
        .collect();

    let mut producers: HashSet<TensorId> = HashSet::new();
    for node in &desc.nodes {
        let mut inputs = Vec::with_capacity(node.inputs.len());
        // Empty names mark absent optional inputs.
        for name in node.inputs.iter().filter(|n| !n.is_empty()) {
            let id = match graph.tensor_id(name) {
                Some(id) => id,
                None if produced.contains(name.as_str()) => {
                    graph.add_tensor(name.clone(), None, DType::F32, TensorKind::Intermediate)
                }
                None => {
                    return Err(Error::InvalidGraph(format!(
                        "node '{}' reads '{}', which is neither declared nor produced",
                        node.name, name
                    )));
                }
            };
            inputs.push(id);
        }

        let mut outputs = Vec::with_capacity(node.outputs.len());
        for name in node.outputs.iter().filter(|n| !n.is_empty()) {
            let id = graph.add_tensor(name.clone(), None, DType::F32, TensorKind::Intermediate);
            if graph.tensor(id).is_constant() || graph.is_input(id) {
                return Err(Error::InvalidGraph(format!(
                    "node '{}' writes '{}', which is an input or initializer",
                    node.name, name
                )));
            }
            if !producers.insert(id) {
                return Err(Error::InvalidGraph(format!(
                    "tensor '{name}' has more than one producer"
                )));
            }
            outputs.push(id);
        }

        let op = OpKind::from_op_type(&node.op_type, inputs.len());
        graph.add_node(node.name.clone(), op, inputs, outputs, node.attributes.clone());
    }

    derive_missing_shapes(&mut graph);
    Ok(graph)
}

fn bind_dims(shape: Shape, bindings: &BTreeMap<String, usize>) -> Shape {
    shape
        .into_iter()
        .map(|dim| match dim {
            Dim::Symbolic(name) => match bindings.get(&name) {
                Some(&value) => Dim::Known(value),
                None => Dim::Symbolic(name),
            },
            known => known,
        })
        .collect()
}

/// Shape-preserving operators hand their input shape to outputs that came
/// without metadata. Anything else stays unknown. Nodes may be declared in
/// any order, so this repeats until no output changes.
fn derive_missing_shapes(graph: &mut Graph) {
    while derive_shapes_once(graph) {}
}

fn derive_shapes_once(graph: &mut Graph) -> bool {
    let mut changed = false;
    for id in graph.node_ids() {
        let node = graph.node(id);
        let preserves_shape = matches!(
            node.op,
            OpKind::Relu | OpKind::QuantizeLinear | OpKind::DequantizeLinear
        );
        if !preserves_shape {
            continue;
        }
        let Some(&source) = node.inputs.first() else {
            continue;
        };
        let Some(shape) = graph.tensor(source).shape.clone() else {
            continue;
        };
        let dtype = match node.op {
            OpKind::QuantizeLinear => node
                .inputs
                .get(2)
                .map(|&zp| graph.tensor(zp).dtype)
                .unwrap_or(DType::U8),
            OpKind::DequantizeLinear => DType::F32,
            _ => graph.tensor(source).dtype,
        };
        for out in node.outputs.clone() {
            let tensor = graph.tensor_mut(out);
            if tensor.shape.is_none() {
                log::warn!("derived shape for '{}' from its input", tensor.name);
                tensor.shape = Some(shape.clone());
                tensor.dtype = dtype;
                changed = true;
            }
        }
    }
    changed
}

fn convert_data(name: &str, dtype: DType, values: &[f64]) -> Result<TensorData> {
    fn ints<T: TryFrom<i64>>(name: &str, values: &[f64]) -> Result<Vec<T>> {
        values
            .iter()
            .map(|&v| {
                if v.fract() != 0.0 {
                    return Err(Error::InvalidGraph(format!(
                        "initializer '{name}' holds non-integer value {v}"
                    )));
                }
                T::try_from(v as i64).map_err(|_| {
                    Error::InvalidGraph(format!("initializer '{name}' value {v} out of range"))
                })
            })
            .collect()
    }

    Ok(match dtype {
        DType::F32 => TensorData::F32(values.iter().map(|&v| v as f32).collect()),
        DType::I32 => TensorData::I32(ints(name, values)?),
        DType::I64 => TensorData::I64(ints(name, values)?),
        DType::I8 => TensorData::I8(ints(name, values)?),
        DType::U8 => TensorData::U8(ints(name, values)?),
    })
}
