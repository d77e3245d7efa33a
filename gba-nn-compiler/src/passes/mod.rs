//! Graph rewrite passes.
//!
//! Each pass scans the live nodes in declaration order, collects its matches,
//! then rewrites them: matched nodes are removed and the replacement is
//! appended. A pass run on its own output finds nothing to do.

mod fold;
mod fusion;

pub use fold::QuantDequantFold;
pub use fusion::{DenseActivationFusion, GemmQuantDequantFusion};

use crate::config::ExportConfig;
use crate::error::Diagnostics;
use crate::ir::{Attributes, Graph};

pub trait Pass {
    /// Name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Rewrite `graph` in place and return how many matches were rewritten.
    fn run(&self, graph: &mut Graph, diagnostics: &mut Diagnostics) -> usize;
}

/// Rewrites performed per pass, in run order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub rewrites: Vec<(&'static str, usize)>,
}

impl PassReport {
    pub fn total(&self) -> usize {
        self.rewrites.iter().map(|(_, n)| n).sum()
    }
}

#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gemm/quantize/dequantize fusion, then activation fusion; the lossy
    /// pair fold runs last and only when enabled.
    pub fn from_config(config: &ExportConfig) -> Self {
        let mut manager = Self::new()
            .with(GemmQuantDequantFusion)
            .with(DenseActivationFusion);
        if config.fold_quant_pairs {
            manager = manager.with(QuantDequantFold);
        }
        manager
    }

    pub fn with(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(&self, graph: &mut Graph, diagnostics: &mut Diagnostics) -> PassReport {
        let mut report = PassReport::default();
        for pass in &self.passes {
            let count = pass.run(graph, diagnostics);
            log::info!("pass {}: {} rewrites", pass.name(), count);
            report.rewrites.push((pass.name(), count));
        }
        report
    }
}

/// Copy `from` into `into` with every key prefixed.
fn merge_prefixed(into: &mut Attributes, from: &Attributes, prefix: &str) {
    for (key, value) in from {
        into.insert(format!("{prefix}{key}"), value.clone());
    }
}
