//! Error taxonomy.
//!
//! `Error` aborts the run. `Diagnostic` records a non-fatal finding; the
//! pipeline keeps going and hands the list back with its result.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse graph description: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("tensor '{tensor}' has no concrete shape (unresolved dim '{dim}')")]
    MissingShape { tensor: String, dim: String },

    #[error("operator cycle among nodes: {}", nodes.join(", "))]
    GraphCycle { nodes: Vec<String> },

    #[error("tensor '{tensor}' has no buffer offset")]
    Unallocated { tensor: String },

    #[error("tensors '{first}' and '{second}' share buffer space while both live")]
    Overlap { first: String, second: String },

    #[error("failed to render generated source: {0}")]
    Render(#[from] fmt::Error),
}

impl Error {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Node kind has no exporter; the generated program will not run it.
    UnsupportedOperator { node: String, op_type: String },
    /// A fusable quantized node lacks a scale or zero point; the unquantized
    /// call is emitted instead.
    MissingQuantizationParameter { node: String, parameter: &'static str },
    /// Scales were present but could not be turned into integer constants.
    InvalidRequantization { node: String, reason: String },
    /// Tensor left out of allocation because its size is unknown.
    SkippedTensor { tensor: String, reason: String },
    /// A quantize/dequantize pair was folded away.
    LossyFold { quantize: String, dequantize: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnsupportedOperator { node, op_type } => {
                write!(f, "unsupported operator {op_type} in node '{node}', skipped")
            }
            Diagnostic::MissingQuantizationParameter { node, parameter } => write!(
                f,
                "node '{node}' is missing {parameter}, emitting unquantized call"
            ),
            Diagnostic::InvalidRequantization { node, reason } => write!(
                f,
                "node '{node}' cannot be requantized ({reason}), emitting unquantized call"
            ),
            Diagnostic::SkippedTensor { tensor, reason } => {
                write!(f, "tensor '{tensor}' excluded from allocation: {reason}")
            }
            Diagnostic::LossyFold {
                quantize,
                dequantize,
            } => write!(
                f,
                "folded quantize/dequantize pair '{quantize}' -> '{dequantize}' (rounding discarded)"
            ),
        }
    }
}

/// Ordered list of non-fatal findings. Every push is also logged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        log::warn!("{diagnostic}");
        self.0.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
