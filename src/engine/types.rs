use crate::{config::Partition, resource::Format, split::ItemRange};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocDiag {
    pub python_exe: String,
    pub python_version: String,
    pub unstructured_version: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionIn {
    pub input: String,
    pub format: Format,
    pub settings: Partition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionOut {
    pub ok: bool,
    #[serde(default)]
    pub elements: Vec<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpubProbe {
    pub item_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitPart {
    pub index: usize,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitIn {
    pub input: String,
    pub out_dir: String,
    pub parts: Vec<SplitPartIn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitPartIn {
    pub index: usize,
    pub title: String,
    pub file_name: String,
    pub items: ItemRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitOut {
    pub ok: bool,
    #[serde(default)]
    pub outputs: Vec<SplitPart>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertOut {
    pub ok: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
