//! Client-side table filtering and sorting
//!
//! A [`TableController`] owns the sort state of one rendered table. Filtering
//! only toggles row visibility and sorting only moves rows; cell contents are
//! never touched.

pub mod collate;
pub mod render;

use std::rc::Rc;

use crate::dom::{Document, NodeId, Selector, SelectorError, SharedDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    /// Class set on the active header
    pub fn indicator_class(self) -> &'static str {
        match self {
            SortDirection::Ascending => "sort-asc",
            SortDirection::Descending => "sort-desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    pub column_index: usize,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSummary {
    pub visible: usize,
    pub hidden: usize,
}

pub struct TableController {
    document: SharedDocument,
    table: NodeId,
    sort: Option<SortState>,
    body: Selector,
    header_row: Selector,
}

impl TableController {
    pub fn new(document: SharedDocument, table: NodeId) -> Result<Self, SelectorError> {
        Ok(Self {
            document,
            table,
            sort: None,
            body: Selector::parse("tbody")?,
            header_row: Selector::parse("thead tr")?,
        })
    }

    pub fn sort_state(&self) -> Option<SortState> {
        self.sort
    }

    fn tbody(&self, doc: &Document) -> Option<NodeId> {
        doc.query_selector(self.table, &self.body)
    }

    fn rows(&self, doc: &Document) -> Vec<NodeId> {
        let Some(tbody) = self.tbody(doc) else {
            return Vec::new();
        };
        doc.element_children(tbody)
            .into_iter()
            .filter(|&row| doc.tag(row) == Some("tr"))
            .collect()
    }

    fn header_cells(&self, doc: &Document) -> Vec<NodeId> {
        let Some(row) = doc.query_selector(self.table, &self.header_row) else {
            return Vec::new();
        };
        doc.element_children(row)
    }

    /// Show rows whose text contains `term` (case-insensitive), hide the rest.
    /// An empty term shows every row.
    pub fn apply_filter(&self, term: &str) -> FilterSummary {
        let needle = term.to_lowercase();
        let mut doc = self.document.borrow_mut();
        let mut summary = FilterSummary::default();

        for row in self.rows(&doc) {
            let matched = needle.is_empty() || doc.text_content(row).to_lowercase().contains(&needle);
            doc.set_hidden(row, !matched);
            if matched {
                summary.visible += 1;
            } else {
                summary.hidden += 1;
            }
        }

        tracing::trace!(
            "Filter {:?}: {} visible, {} hidden",
            term,
            summary.visible,
            summary.hidden
        );
        summary
    }

    /// Sort body rows by the text of `column_index`.
    ///
    /// A column that is not the active sort starts ascending; the active
    /// column flips direction. Flipping reverses the current order before
    /// the stable sort, so two activations in a row give exactly reversed
    /// orders even when cells tie. Returns `None` (and changes nothing) when
    /// the table has no body or no header cell at `column_index`.
    pub fn apply_sort(&mut self, column_index: usize) -> Option<SortState> {
        let document = Rc::clone(&self.document);
        let mut doc = document.borrow_mut();

        let headers = self.header_cells(&doc);
        if column_index >= headers.len() {
            tracing::debug!("No header at column {}, ignoring sort", column_index);
            return None;
        }
        let tbody = self.tbody(&doc)?;

        let toggling = self.sort.is_some_and(|s| s.column_index == column_index);
        let direction = match self.sort {
            Some(s) if toggling => s.direction.flipped(),
            _ => SortDirection::Ascending,
        };

        let mut rows = self.rows(&doc);
        if toggling {
            rows.reverse();
        }
        let mut keyed: Vec<(String, NodeId)> = rows
            .into_iter()
            .map(|row| (cell_text(&doc, row, column_index), row))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            let ord = collate::compare(a, b);
            match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
        for (_, row) in keyed {
            doc.append_child(tbody, row);
        }

        for (index, &header) in headers.iter().enumerate() {
            doc.remove_class(header, SortDirection::Ascending.indicator_class());
            doc.remove_class(header, SortDirection::Descending.indicator_class());
            if index == column_index {
                doc.add_class(header, direction.indicator_class());
            }
        }

        let state = SortState {
            column_index,
            direction,
        };
        self.sort = Some(state);
        Some(state)
    }

    /// Click handler for a header cell: sorts by the header's position among
    /// its siblings. Headers without the `sortable` class are ignored.
    pub fn activate_header(&mut self, header: NodeId) -> Option<SortState> {
        let column_index = {
            let doc = self.document.borrow();
            if !doc.has_class(header, "sortable") {
                return None;
            }
            let row = doc.parent(header)?;
            if !self.header_cells(&doc).contains(&header) {
                tracing::debug!("Header {:?} belongs to another table", header);
                return None;
            }
            doc.element_children(row).iter().position(|&c| c == header)?
        };
        self.apply_sort(column_index)
    }

    /// Cell texts of the rows currently shown, in display order
    pub fn visible_rows(&self) -> Vec<Vec<String>> {
        let doc = self.document.borrow();
        self.rows(&doc)
            .into_iter()
            .filter(|&row| !doc.is_hidden(row))
            .map(|row| {
                doc.element_children(row)
                    .into_iter()
                    .map(|cell| doc.text_content(cell))
                    .collect()
            })
            .collect()
    }

    /// Header labels with the active sort marked
    pub fn header_labels(&self) -> Vec<String> {
        let doc = self.document.borrow();
        self.header_cells(&doc)
            .into_iter()
            .map(|cell| {
                let label = doc.text_content(cell);
                if doc.has_class(cell, SortDirection::Ascending.indicator_class()) {
                    format!("{} ▲", label)
                } else if doc.has_class(cell, SortDirection::Descending.indicator_class()) {
                    format!("{} ▼", label)
                } else {
                    label
                }
            })
            .collect()
    }
}

fn cell_text(doc: &Document, row: NodeId, column_index: usize) -> String {
    doc.element_children(row)
        .get(column_index)
        .map(|&cell| doc.text_content(cell).trim().to_string())
        .unwrap_or_default()
}
