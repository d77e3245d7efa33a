//! Export configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Element type of the scratch buffer and of every activation on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ElemType {
    #[default]
    #[serde(rename = "int8_t")]
    Int8,
    #[serde(rename = "int16_t")]
    Int16,
    #[serde(rename = "int32_t")]
    Int32,
    #[serde(rename = "float")]
    Float32,
}

impl ElemType {
    pub fn c_type(self) -> &'static str {
        match self {
            ElemType::Int8 => "int8_t",
            ElemType::Int16 => "int16_t",
            ElemType::Int32 => "int32_t",
            ElemType::Float32 => "float",
        }
    }

    pub fn byte_width(self) -> usize {
        match self {
            ElemType::Int8 => 1,
            ElemType::Int16 => 2,
            ElemType::Int32 | ElemType::Float32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocStrategy {
    /// Liveness-driven best-fit with reuse of freed regions.
    #[default]
    Reuse,
    /// Every tensor gets its own region, in birth order.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub datatype: ElemType,
    /// Size RAM tensors by their declared dtype instead of `datatype`.
    pub size_by_declared_dtype: bool,
    pub buffer_name: String,
    pub function_name: String,
    pub source_dir: String,
    pub include_dir: String,
    pub kernel_header: String,
    pub strategy: AllocStrategy,
    /// Run the lossy quantize/dequantize pair deletion after fusion.
    pub fold_quant_pairs: bool,
    /// Concrete values for symbolic dims, applied while loading.
    pub dim_bindings: BTreeMap<String, usize>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            datatype: ElemType::Int8,
            size_by_declared_dtype: false,
            buffer_name: "mem_buffer".to_string(),
            function_name: "forward".to_string(),
            source_dir: "source".to_string(),
            include_dir: "include".to_string(),
            kernel_header: "nn_functions.h".to_string(),
            strategy: AllocStrategy::Reuse,
            fold_quant_pairs: false,
            dim_bindings: BTreeMap::new(),
        }
    }
}

impl ExportConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ExportConfig = serde_json::from_str(
            r#"{ "strategy": "sequential", "dim_bindings": { "batch_size": 1 } }"#,
        )
        .unwrap();
        assert_eq!(config.strategy, AllocStrategy::Sequential);
        assert_eq!(config.dim_bindings.get("batch_size"), Some(&1));
        assert_eq!(config.buffer_name, "mem_buffer");
        assert_eq!(config.datatype, ElemType::Int8);
    }

    #[test]
    fn datatype_uses_c_spelling() {
        let config: ExportConfig = serde_json::from_str(r#"{ "datatype": "int16_t" }"#).unwrap();
        assert_eq!(config.datatype.c_type(), "int16_t");
        assert_eq!(config.datatype.byte_width(), 2);
    }
}
