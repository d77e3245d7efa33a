//! `gba-nn-export`: compile a graph description into C sources.
//!
//! Usage:
//!   gba-nn-export model.json -o build/
//!   gba-nn-export model.json -o build/ --config export.json --bind batch_size=1

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};

use gba_nn_compiler::{export, AllocStrategy, ElemType, ExportConfig};

#[derive(Parser)]
#[command(name = "gba-nn-export", version, about = "Compile a quantized NN graph into C")]
struct Cli {
    /// Graph description (JSON)
    model: PathBuf,

    /// Output directory; `source/` and `include/` are created under it
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Export configuration (JSON); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Element type of the scratch buffer and activations
    #[arg(long, value_enum)]
    datatype: Option<DatatypeArg>,

    /// Buffer allocation strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Delete quantize/dequantize round trips (changes numerics)
    #[arg(long)]
    fold_quant_pairs: bool,

    /// Bind a symbolic dimension, e.g. `--bind batch_size=1`
    #[arg(long = "bind", value_name = "NAME=VALUE", value_parser = parse_binding)]
    bindings: Vec<(String, usize)>,
}

#[derive(Clone, Copy, ValueEnum)]
enum DatatypeArg {
    #[value(name = "int8_t")]
    Int8,
    #[value(name = "int16_t")]
    Int16,
    #[value(name = "int32_t")]
    Int32,
    Float,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Reuse,
    Sequential,
}

fn parse_binding(arg: &str) -> Result<(String, usize), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{arg}'"))?;
    let value = value
        .parse()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.to_string(), value))
}

fn build_config(cli: &Cli) -> gba_nn_compiler::Result<ExportConfig> {
    let mut config = match &cli.config {
        Some(path) => ExportConfig::from_file(path)?,
        None => ExportConfig::default(),
    };
    if let Some(datatype) = cli.datatype {
        config.datatype = match datatype {
            DatatypeArg::Int8 => ElemType::Int8,
            DatatypeArg::Int16 => ElemType::Int16,
            DatatypeArg::Int32 => ElemType::Int32,
            DatatypeArg::Float => ElemType::Float32,
        };
    }
    if let Some(strategy) = cli.strategy {
        config.strategy = match strategy {
            StrategyArg::Reuse => AllocStrategy::Reuse,
            StrategyArg::Sequential => AllocStrategy::Sequential,
        };
    }
    config.fold_quant_pairs |= cli.fold_quant_pairs;
    config.dim_bindings.extend(cli.bindings.iter().cloned());
    Ok(config)
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = build_config(&cli).and_then(|config| export(&cli.model, &cli.out_dir, &config));
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    for diagnostic in &report.diagnostics {
        eprintln!("warning: {diagnostic}");
    }
    for path in &report.written {
        eprintln!("  wrote {}", path.display());
    }
    eprintln!(
        "buffer: {} bytes ({} without reuse)",
        report.buffer_size, report.sequential_size
    );
}
