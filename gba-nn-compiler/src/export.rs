//! End-to-end export: model file in, C sources out.

use std::fs;
use std::path::{Path, PathBuf};

use crate::codegen::{self, CodegenPlan, GeneratedFile, LowerInputs};
use crate::config::ExportConfig;
use crate::error::{Diagnostics, Error, Result};
use crate::ir::Graph;
use crate::memory::{self, ElementWidth, MemoryPlan};
use crate::parse::json;
use crate::passes::{PassManager, PassReport};
use crate::schedule::schedule;

/// Everything produced from one graph, before anything touches disk.
#[derive(Debug)]
pub struct Compiled {
    pub plan: CodegenPlan,
    pub files: Vec<GeneratedFile>,
    pub memory: MemoryPlan,
    pub passes: PassReport,
    pub diagnostics: Diagnostics,
}

/// Summary of a completed export.
#[derive(Debug)]
pub struct ExportReport {
    /// Absolute or `out_dir`-joined paths, in write order.
    pub written: Vec<PathBuf>,
    pub buffer_size: usize,
    /// Size the buffer would need without reuse.
    pub sequential_size: usize,
    pub diagnostics: Diagnostics,
}

/// Runs passes, classification, scheduling, allocation, lowering and
/// rendering over `graph`.
pub fn compile(mut graph: Graph, config: &ExportConfig) -> Result<Compiled> {
    let mut diagnostics = Diagnostics::new();

    let passes = PassManager::from_config(config).run(&mut graph, &mut diagnostics);
    let classification = memory::classify(&graph, ElementWidth::from_config(config), &mut diagnostics);
    let schedule = schedule(&graph)?;
    let lifetimes = memory::lifetimes(&graph, &schedule, &classification);
    let memory = memory::allocate(&lifetimes, config.strategy);

    if let Some((a, b)) = memory.first_conflict() {
        return Err(Error::Overlap {
            first: graph.tensor(a.tensor).name.clone(),
            second: graph.tensor(b.tensor).name.clone(),
        });
    }

    let inputs = LowerInputs {
        schedule: &schedule,
        classification: &classification,
        memory: &memory,
        buffer_name: &config.buffer_name,
    };
    let plan = codegen::lower(&graph, &inputs, &mut diagnostics)?;
    let files = codegen::render(&plan, config)?;

    log::info!(
        "compiled {} layers into {} files, buffer {} bytes (sequential {})",
        plan.layers.len(),
        files.len(),
        memory.total_size,
        memory.sequential_size
    );

    Ok(Compiled {
        plan,
        files,
        memory,
        passes,
        diagnostics,
    })
}

/// Loads `model_path`, compiles it and writes the generated files under
/// `out_dir`. On a write failure every file written by this call is removed.
pub fn export(model_path: &Path, out_dir: &Path, config: &ExportConfig) -> Result<ExportReport> {
    let data = fs::read(model_path).map_err(|e| Error::io("read", model_path, e))?;
    let graph = json::to_graph(&data, &config.dim_bindings)?;
    log::info!(
        "loaded {}: {} nodes, {} inputs, {} outputs",
        model_path.display(),
        graph.node_count(),
        graph.inputs.len(),
        graph.outputs.len()
    );

    let compiled = compile(graph, config)?;
    let written = write_all(out_dir, &compiled.files)?;

    Ok(ExportReport {
        written,
        buffer_size: compiled.memory.total_size,
        sequential_size: compiled.memory.sequential_size,
        diagnostics: compiled.diagnostics,
    })
}

fn write_all(out_dir: &Path, files: &[GeneratedFile]) -> Result<Vec<PathBuf>> {
    let mut written: Vec<PathBuf> = Vec::new();
    for file in files {
        let path = out_dir.join(&file.path);
        if let Err(err) = write_one(&path, &file.contents) {
            for done in &written {
                if let Err(e) = fs::remove_file(done) {
                    log::warn!("could not remove {}: {e}", done.display());
                }
            }
            return Err(err);
        }
        log::debug!("wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

fn write_one(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
    }
    fs::write(path, contents).map_err(|e| Error::io("write", path, e))
}
