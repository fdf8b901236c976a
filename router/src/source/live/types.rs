use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TableEnvelope {
    pub table: Table,
}

/// Column-oriented table as returned by `tabledap/<dataset>.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub column_names: Vec<String>,

    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Table {
    pub fn empty() -> Self {
        Self {
            column_names: Vec::new(),
            rows: Vec::new(),
        }
    }
}
