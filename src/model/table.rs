//! Two-dimensional tables reported by the cluster.

use comfy_table::{presets, ContentArrangement, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named table as the cluster reports it, stored column-major.
///
/// `data[c][r]` is the cell in row `r` of column `c`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoDimTable {
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<TableColumn>,
    pub data: Vec<Vec<Value>>,
}

/// Column header of a [`TwoDimTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl TwoDimTable {
    /// Interpret `value` as a table if it has the table shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if !object.contains_key("columns") || !object.contains_key("data") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows (length of the longest column).
    pub fn rows(&self) -> usize {
        self.data.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Value> {
        self.data.get(col)?.get(row)
    }

    /// Draw the table, titled with its name when it has one.
    pub fn render(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Disabled)
            .set_header(self.column_names());

        for row in 0..self.rows() {
            let cells: Vec<String> = (0..self.column_count())
                .map(|col| self.cell(row, col).map(format_cell).unwrap_or_default())
                .collect();
            table.add_row(cells);
        }

        match &self.name {
            Some(name) => format!("{}\n{}", name, table),
            None => table.to_string(),
        }
    }
}

/// Display form of one cell; strings unquoted, null empty.
pub(crate) fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A confusion matrix: actual classes by row, predicted classes by column,
/// followed by an error-rate column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfusionMatrix {
    table: TwoDimTable,
}

impl ConfusionMatrix {
    pub fn new(table: TwoDimTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TwoDimTable {
        &self.table
    }

    /// Class labels, i.e. every column except the trailing `Error` column.
    pub fn class_labels(&self) -> Vec<&str> {
        self.table
            .column_names()
            .into_iter()
            .filter(|name| !name.eq_ignore_ascii_case("error") && !name.eq_ignore_ascii_case("rate"))
            .collect()
    }

    /// Count of rows with actual class `actual` predicted as `predicted`.
    pub fn count(&self, actual: usize, predicted: usize) -> Option<u64> {
        self.table.cell(actual, predicted)?.as_u64()
    }

    pub fn render(&self) -> String {
        self.table.render()
    }
}

impl From<TwoDimTable> for ConfusionMatrix {
    fn from(table: TwoDimTable) -> Self {
        Self::new(table)
    }
}
