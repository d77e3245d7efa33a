//! Renders a `CodegenPlan` into C sources.
//!
//! Output is plain text built with `fmt::Write`; every file is produced in a
//! fixed order so repeated exports are byte-identical.

use std::fmt::Write;
use std::path::PathBuf;

use crate::config::ExportConfig;
use crate::error::Result;
use crate::ir::TensorData;

use super::layers::ParamArray;
use super::plan::*;
use super::tensor_expr::TensorExprWriter;

/// Values per line in constant array initializers.
const VALUES_PER_LINE: usize = 16;

/// One generated artifact, relative to the export directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub contents: String,
}

pub fn render(plan: &CodegenPlan, config: &ExportConfig) -> Result<Vec<GeneratedFile>> {
    let writer = TensorExprWriter::new(config);
    let include_dir = PathBuf::from(&config.include_dir);

    let mut files = Vec::new();
    for layer in &plan.layers {
        if let Some(header) = layer.params_header() {
            files.push(GeneratedFile {
                contents: render_params_header(&header, &layer.params(&writer))?,
                path: include_dir.join(header),
            });
        }
    }
    files.push(GeneratedFile {
        path: include_dir.join(format!("{}.h", config.function_name)),
        contents: render_function_header(config)?,
    });
    files.push(GeneratedFile {
        path: PathBuf::from(&config.source_dir).join(format!("{}.c", config.function_name)),
        contents: render_function_source(plan, config, &writer)?,
    });
    Ok(files)
}

/// `forward.h` -> `FORWARD_H`
fn include_guard(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn prototype(config: &ExportConfig) -> String {
    let ctype = config.datatype.c_type();
    format!(
        "void {}({ctype} *input, {ctype} *output)",
        config.function_name
    )
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

fn render_function_header(config: &ExportConfig) -> Result<String> {
    let guard = include_guard(&format!("{}.h", config.function_name));
    let mut out = String::new();
    writeln!(out, "#ifndef {guard}")?;
    writeln!(out, "#define {guard}")?;
    writeln!(out)?;
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out)?;
    writeln!(out, "{};", prototype(config))?;
    writeln!(out)?;
    writeln!(out, "#endif /* {guard} */")?;
    Ok(out)
}

fn render_params_header(file_name: &str, params: &[ParamArray<'_>]) -> Result<String> {
    let guard = include_guard(file_name);
    let mut out = String::new();
    writeln!(out, "#ifndef {guard}")?;
    writeln!(out, "#define {guard}")?;
    writeln!(out)?;
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out)?;
    for param in params {
        writeln!(out, "#define {} {}", param.len_define, param.array.data.len())?;
    }
    for param in params {
        writeln!(out)?;
        render_const_array(&mut out, param)?;
    }
    writeln!(out)?;
    writeln!(out, "#endif /* {guard} */")?;
    Ok(out)
}

fn render_const_array(out: &mut String, param: &ParamArray<'_>) -> Result<()> {
    let data = &param.array.data;
    writeln!(
        out,
        "static const {} {}[{}] = {{",
        data.dtype().c_type(),
        param.name,
        param.len_define
    )?;
    let values = c_literals(data);
    for chunk in values.chunks(VALUES_PER_LINE) {
        writeln!(out, "    {},", chunk.join(", "))?;
    }
    writeln!(out, "}};")?;
    Ok(())
}

fn c_literals(data: &TensorData) -> Vec<String> {
    fn fmt_all<T: ToString>(values: &[T]) -> Vec<String> {
        values.iter().map(T::to_string).collect()
    }
    match data {
        // `{:?}` keeps a decimal point so the literal stays a float.
        TensorData::F32(v) => v.iter().map(|x| format!("{x:?}f")).collect(),
        TensorData::I32(v) => fmt_all(v),
        TensorData::I64(v) => v.iter().map(|x| format!("{x}LL")).collect(),
        TensorData::I8(v) => fmt_all(v),
        TensorData::U8(v) => fmt_all(v),
    }
}

// ---------------------------------------------------------------------------
// Function source
// ---------------------------------------------------------------------------

fn render_function_source(
    plan: &CodegenPlan,
    config: &ExportConfig,
    writer: &TensorExprWriter,
) -> Result<String> {
    let mut out = String::new();
    let size_define = format!("{}_SIZE", config.buffer_name.to_uppercase());

    writeln!(out, "#include <stdint.h>")?;
    writeln!(out, "#include \"{}.h\"", config.function_name)?;
    writeln!(out, "#include \"{}\"", config.kernel_header)?;
    for header in plan.layers.iter().filter_map(LayerPlan::params_header) {
        writeln!(out, "#include \"{header}\"")?;
    }
    writeln!(out)?;

    writeln!(out, "#define {size_define} {}", plan.buffer_size)?;
    for layer in &plan.layers {
        for define in layer.defines(writer) {
            writeln!(out, "#define {} {}", define.name, define.value)?;
        }
    }
    writeln!(out)?;

    if plan.buffer_size > 0 {
        writeln!(
            out,
            "static {} {}[{size_define}];",
            config.datatype.c_type(),
            config.buffer_name
        )?;
        writeln!(out)?;
    }

    writeln!(out, "{} {{", prototype(config))?;
    for layer in &plan.layers {
        for call in layer.calls(writer) {
            writeln!(out, "    {call}")?;
        }
    }
    writeln!(out, "}}")?;
    Ok(out)
}
