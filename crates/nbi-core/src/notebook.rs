//! Notebook artifact builder
//!
//! Every produced notebook targets the same in-browser Python kernel, so the
//! metadata block is fixed and only the cells come from the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Notebook format major version
pub const NBFORMAT: u32 = 4;

/// Notebook format minor version
pub const NBFORMAT_MINOR: u32 = 4;

/// Kernel identity written into every notebook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub display_name: String,
    pub language: String,
    pub name: String,
}

/// Fixed notebook metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookMetadata {
    pub kernelspec: KernelSpec,
    pub language_info: Value,
}

impl NotebookMetadata {
    /// Metadata for the Pyodide kernel
    #[must_use]
    pub fn pyodide() -> Self {
        Self {
            kernelspec: KernelSpec {
                display_name: "Python (Pyodide)".to_string(),
                language: "python".to_string(),
                name: "python".to_string(),
            },
            language_info: json!({
                "codemirror_mode": {"name": "python", "version": 3},
                "file_extension": ".py",
                "mimetype": "text/x-python",
                "name": "python",
                "nbconvert_exporter": "python",
                "pygments_lexer": "ipython3",
                "version": "3.8"
            }),
        }
    }
}

/// Canonical notebook document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookDocument {
    pub metadata: NotebookMetadata,
    pub nbformat: u32,
    pub nbformat_minor: u32,
    pub cells: Vec<Value>,
}

impl NotebookDocument {
    /// Document with fixed metadata around `cells`
    #[must_use]
    pub fn new(cells: Vec<Value>) -> Self {
        Self {
            metadata: NotebookMetadata::pyodide(),
            nbformat: NBFORMAT,
            nbformat_minor: NBFORMAT_MINOR,
            cells,
        }
    }

    /// Canonical serialized form
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Storage envelope for a notebook file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookArtifact {
    pub name: String,
    pub path: String,
    pub size: usize,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub format: String,
    pub mimetype: String,
    pub writable: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: NotebookDocument,
}

impl NotebookArtifact {
    /// JSON object written to the store
    pub fn to_record(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Build the artifact for `filename` holding `cells`
///
/// # Errors
/// Only if a cell cannot be serialized, which cannot happen for values that
/// came out of a JSON parser.
pub fn build(filename: &str, cells: Vec<Value>) -> Result<NotebookArtifact, serde_json::Error> {
    let content = NotebookDocument::new(cells);
    let size = content.to_bytes()?.len();
    let now = Utc::now();

    Ok(NotebookArtifact {
        name: filename.to_string(),
        path: filename.to_string(),
        size,
        created: now,
        last_modified: now,
        format: "json".to_string(),
        mimetype: "application/json".to_string(),
        writable: true,
        kind: "notebook".to_string(),
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn build_sets_fixed_fields() {
        let artifact = build("demo.ipynb", vec![json!({"cell_type": "code"})]).unwrap();

        assert_eq!(artifact.name, "demo.ipynb");
        assert_eq!(artifact.path, "demo.ipynb");
        assert_eq!(artifact.format, "json");
        assert_eq!(artifact.mimetype, "application/json");
        assert!(artifact.writable);
        assert_eq!(artifact.kind, "notebook");
        assert_eq!(artifact.created, artifact.last_modified);
        assert_eq!(artifact.content.metadata.kernelspec.name, "python");
        assert_eq!(artifact.content.nbformat, 4);
    }

    #[test]
    fn caller_metadata_in_cells_does_not_leak() {
        let cells = vec![json!({"metadata": {"kernelspec": {"name": "r"}}})];
        let artifact = build("x.ipynb", cells).unwrap();
        assert_eq!(artifact.content.metadata, NotebookMetadata::pyodide());
    }

    #[test]
    fn record_uses_type_field() {
        let record = build("x.ipynb", vec![]).unwrap().to_record().unwrap();
        assert_eq!(record["type"], "notebook");
        assert_eq!(record["content"]["cells"], json!([]));
        assert!(record["created"].is_string());
    }

    fn cell() -> impl Strategy<Value = Value> {
        ("[a-z]{0,6}", "\\PC{0,24}", any::<bool>()).prop_map(|(kind, source, flag)| {
            json!({"cell_type": kind, "source": source, "metadata": {"collapsed": flag}})
        })
    }

    proptest! {
        #[test]
        fn prop_cells_preserved_and_size_exact(cells in proptest::collection::vec(cell(), 0..12)) {
            let artifact = build("p.ipynb", cells.clone()).unwrap();
            prop_assert_eq!(&artifact.content.cells, &cells);
            prop_assert_eq!(artifact.size, serde_json::to_vec(&artifact.content).unwrap().len());
        }
    }
}
