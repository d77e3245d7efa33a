pub mod graph;
pub mod op;

#[cfg(test)]
pub(crate) mod builder;

pub use graph::{
    element_count, AttrValue, Attributes, DType, Dim, Graph, Node, NodeId, Shape, Tensor,
    TensorData, TensorId, TensorKind,
};
pub use op::{OpKind, QuantSlots};
