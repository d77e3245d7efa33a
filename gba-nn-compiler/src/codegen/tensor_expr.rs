use crate::config::ExportConfig;

use super::plan::LayerPlan;

/**
 * Helper for spelling C expressions and identifiers for a layer.
 */
pub struct TensorExprWriter<'a> {
    buffer: &'a str,
    datatype: &'static str,
}

impl<'a> TensorExprWriter<'a> {
    pub fn new(config: &'a ExportConfig) -> Self {
        Self {
            buffer: &config.buffer_name,
            datatype: config.datatype.c_type(),
        }
    }

    /// Kernel name for the configured element type: `relu` -> `relu_int8_t`.
    pub fn kernel(&self, base: &str) -> String {
        format!("{base}_{}", self.datatype)
    }

    /// Define name: `{SYMBOL}_{SUFFIX}`.
    pub fn constant(&self, layer: &LayerPlan, suffix: &str) -> String {
        format!("{}_{suffix}", layer.symbol)
    }

    /// Parameter array name: `{SYMBOL}_{field}`.
    pub fn array(&self, layer: &LayerPlan, field: &str) -> String {
        format!("{}_{field}", layer.symbol)
    }

    /// Read operand of a layer call.
    ///
    /// - First layer → `input` (the function parameter)
    /// - Otherwise → `mem_buffer + {SYMBOL}_INPUT_IDX`
    pub fn read(&self, layer: &LayerPlan) -> String {
        if layer.position.reads_input() {
            "input".to_string()
        } else {
            format!("{} + {}", self.buffer, self.constant(layer, "INPUT_IDX"))
        }
    }

    /// Write operand of a layer call.
    ///
    /// - Last layer → `output` (the function parameter)
    /// - Otherwise → `mem_buffer + {SYMBOL}_OUTPUT_IDX`
    pub fn write(&self, layer: &LayerPlan) -> String {
        if layer.position.writes_output() {
            "output".to_string()
        } else {
            format!("{} + {}", self.buffer, self.constant(layer, "OUTPUT_IDX"))
        }
    }
}

/// C identifier prefix for a node: every character outside `[A-Za-z0-9_]`
/// becomes `_`, the result is upper-cased, and a leading digit gets a `_`
/// prefix. Anonymous nodes are named after their op type and position.
pub fn symbol_name(node_name: &str, op_type: &str, position: usize) -> String {
    let raw = if node_name.is_empty() {
        format!("{op_type}_{position}")
    } else {
        node_name.to_string()
    };
    let mut symbol: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if symbol.starts_with(|c: char| c.is_ascii_digit()) {
        symbol.insert(0, '_');
    }
    symbol
}
