use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dom::{Document, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableShapeError {
    #[error("table has no columns")]
    NoColumns,
    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Plain table contents, as loaded from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    /// Every row must have one cell per header
    pub fn check_shape(&self) -> Result<(), TableShapeError> {
        if self.headers.is_empty() {
            return Err(TableShapeError::NoColumns);
        }
        let expected = self.headers.len();
        for (row, cells) in self.rows.iter().enumerate() {
            if cells.len() != expected {
                return Err(TableShapeError::RaggedRow {
                    row,
                    expected,
                    found: cells.len(),
                });
            }
        }
        Ok(())
    }
}

/// Render `data` as `table > thead > tr > th.sortable` plus
/// `tbody > tr > td` under `parent`, returning the table element.
pub fn render_table(doc: &mut Document, parent: NodeId, data: &TableData) -> NodeId {
    let table = doc.create_element("table");
    doc.add_class(table, "table");

    let thead = doc.create_element("thead");
    let header_row = doc.create_element("tr");
    for header in &data.headers {
        let th = doc.create_element("th");
        doc.add_class(th, "sortable");
        doc.set_text_content(th, header);
        doc.append_child(header_row, th);
    }
    doc.append_child(thead, header_row);
    doc.append_child(table, thead);

    let tbody = doc.create_element("tbody");
    for cells in &data.rows {
        let tr = doc.create_element("tr");
        for cell in cells {
            let td = doc.create_element("td");
            doc.set_text_content(td, cell);
            doc.append_child(tr, td);
        }
        doc.append_child(tbody, tr);
    }
    doc.append_child(table, tbody);

    doc.append_child(parent, table);
    table
}
