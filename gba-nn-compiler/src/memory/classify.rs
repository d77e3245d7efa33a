//! ROM / RAM classification of tensors.
//!
//! Rules run in a fixed order and the first match wins. Constants and
//! anything that folds into one live in ROM; everything else with a concrete
//! shape is an activation that needs a region of the scratch buffer.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::config::ExportConfig;
use crate::error::{Diagnostic, Diagnostics};
use crate::ir::{element_count, Graph, NodeId, OpKind, Tensor, TensorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomReason {
    Initializer,
    /// Output of a dequantize node reading an initializer.
    DequantizedInitializer,
    /// Neither produced nor part of the graph boundary.
    Orphan,
    /// Unproduced tensor whose name marks it as a weight or bias.
    NamedParameter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoShape,
    SymbolicDim(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoShape => f.write_str("no shape metadata"),
            SkipReason::SymbolicDim(dim) => write!(f, "symbolic dimension '{dim}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Rom(RomReason),
    Ram { bytes: usize },
    Skipped(SkipReason),
}

/// Bytes per element for RAM tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementWidth {
    /// Use each tensor's declared dtype.
    Declared,
    /// Every activation has the target element type.
    Fixed(usize),
}

impl ElementWidth {
    pub fn from_config(config: &ExportConfig) -> Self {
        if config.size_by_declared_dtype {
            ElementWidth::Declared
        } else {
            ElementWidth::Fixed(config.datatype.byte_width())
        }
    }

    fn of(self, tensor: &Tensor) -> usize {
        match self {
            ElementWidth::Declared => tensor.dtype.byte_width(),
            ElementWidth::Fixed(width) => width,
        }
    }
}

/// Placement of every live tensor, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    placements: BTreeMap<TensorId, Placement>,
}

impl Classification {
    pub fn placement(&self, tensor: TensorId) -> Option<&Placement> {
        self.placements.get(&tensor)
    }

    pub fn ram_bytes(&self, tensor: TensorId) -> Option<usize> {
        match self.placements.get(&tensor) {
            Some(Placement::Ram { bytes }) => Some(*bytes),
            _ => None,
        }
    }

    /// RAM tensors and their sizes in id order.
    pub fn ram(&self) -> impl Iterator<Item = (TensorId, usize)> + '_ {
        self.placements.iter().filter_map(|(&id, p)| match p {
            Placement::Ram { bytes } => Some((id, *bytes)),
            _ => None,
        })
    }

    pub fn skip_reason(&self, tensor: TensorId) -> Option<&SkipReason> {
        match self.placements.get(&tensor) {
            Some(Placement::Skipped(reason)) => Some(reason),
            _ => None,
        }
    }

    pub fn is_rom(&self, tensor: TensorId) -> bool {
        matches!(self.placements.get(&tensor), Some(Placement::Rom(_)))
    }
}

struct Context<'a> {
    graph: &'a Graph,
    producers: HashMap<TensorId, NodeId>,
}

type RomRule = fn(&Context<'_>, &Tensor) -> bool;

const ROM_RULES: &[(RomReason, RomRule)] = &[
    (RomReason::Initializer, is_initializer),
    (RomReason::DequantizedInitializer, is_dequantized_initializer),
    (RomReason::Orphan, is_orphan),
    (RomReason::NamedParameter, is_named_parameter),
];

fn is_initializer(_: &Context<'_>, tensor: &Tensor) -> bool {
    tensor.is_constant()
}

fn is_dequantized_initializer(ctx: &Context<'_>, tensor: &Tensor) -> bool {
    let Some(&producer) = ctx.producers.get(&tensor.id) else {
        return false;
    };
    let node = ctx.graph.node(producer);
    node.op == OpKind::DequantizeLinear
        && node
            .inputs
            .first()
            .is_some_and(|&source| ctx.graph.tensor(source).is_constant())
}

fn is_orphan(ctx: &Context<'_>, tensor: &Tensor) -> bool {
    !ctx.producers.contains_key(&tensor.id)
        && !ctx.graph.is_input(tensor.id)
        && !ctx.graph.is_output(tensor.id)
}

fn is_named_parameter(ctx: &Context<'_>, tensor: &Tensor) -> bool {
    let name = tensor.name.to_lowercase();
    (name.contains("weight") || name.contains("bias"))
        && !ctx.graph.is_input(tensor.id)
        && !ctx.producers.contains_key(&tensor.id)
}

pub fn classify(graph: &Graph, width: ElementWidth, diagnostics: &mut Diagnostics) -> Classification {
    let ctx = Context {
        graph,
        producers: graph.producer_map(),
    };

    let mut placements = BTreeMap::new();
    for tensor in graph.tensors() {
        let placement = place(&ctx, tensor, width);
        if let Placement::Skipped(reason) = &placement {
            diagnostics.push(Diagnostic::SkippedTensor {
                tensor: tensor.name.clone(),
                reason: reason.to_string(),
            });
        }
        placements.insert(tensor.id, placement);
    }

    let classification = Classification { placements };
    log_report(graph, &classification);
    classification
}

fn place(ctx: &Context<'_>, tensor: &Tensor, width: ElementWidth) -> Placement {
    if let Some((reason, _)) = ROM_RULES.iter().find(|(_, rule)| rule(ctx, tensor)) {
        return Placement::Rom(*reason);
    }
    let Some(shape) = &tensor.shape else {
        return Placement::Skipped(SkipReason::NoShape);
    };
    match element_count(shape) {
        Ok(count) => Placement::Ram {
            bytes: count * width.of(tensor),
        },
        Err(dim) => Placement::Skipped(SkipReason::SymbolicDim(dim.to_string())),
    }
}

fn log_report(graph: &Graph, classification: &Classification) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let ram: Vec<_> = classification.ram().collect();
    log::debug!(
        "classified {} tensors, {} in RAM",
        classification.placements.len(),
        ram.len()
    );
    for (&id, placement) in &classification.placements {
        let name = &graph.tensor(id).name;
        match placement {
            Placement::Ram { bytes } => log::debug!("  + {name}: {bytes} bytes"),
            Placement::Rom(reason) => log::debug!("  - {name}: ROM ({reason:?})"),
            Placement::Skipped(reason) => log::debug!("  ! {name}: skipped, {reason}"),
        }
    }
}
