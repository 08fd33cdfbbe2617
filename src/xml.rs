//! XML record reader for POS export files.
//!
//! Parses a file into a read-only tree and exposes the `<Records>/<Record>`
//! layout shared by every master file, plus small child-tag accessors.
//! Carries no business knowledge.

use roxmltree::{Document, Node};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extraction-level failures. Recovered per file or per record by the
/// extractors; never abort a whole organization.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed XML document {}: {source}", path.display())]
    MalformedDocument {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    #[error("missing <Records> container in {}", path.display())]
    MissingRecords { path: PathBuf },

    #[error("record field <{tag}> missing in {}", path.display())]
    RecordFieldMissing { tag: &'static str, path: PathBuf },

    #[error("unparsable <{tag}> value {value:?} in {}", path.display())]
    BadFieldValue {
        tag: &'static str,
        value: String,
        path: PathBuf,
    },
}

/// Raw file contents. `roxmltree` documents borrow from this buffer, so the
/// buffer outlives every node read from it.
pub struct XmlFile {
    path: PathBuf,
    text: String,
}

impl XmlFile {
    pub fn load(path: &Path) -> Result<Self, ExtractError> {
        let text = std::fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            text,
        })
    }

    pub fn parse(&self) -> Result<Document<'_>, ExtractError> {
        Document::parse(&self.text).map_err(|source| ExtractError::MalformedDocument {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// First child element named `tag`.
pub fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

/// Text of the first child element named `tag`.
pub fn child_text<'a>(node: Node<'a, '_>, tag: &str) -> Option<&'a str> {
    child(node, tag).and_then(|n| n.text())
}

/// The document-level `<Name>` tag identifying a master file's data type.
pub fn doc_label<'a>(doc: &'a Document) -> Option<&'a str> {
    child_text(doc.root_element(), "Name")
}

/// The `<Record>` children of the `<Records>` container under the root.
pub fn records<'a, 'input>(
    doc: &'a Document<'input>,
    path: &Path,
) -> Result<Vec<Node<'a, 'input>>, ExtractError> {
    let container =
        child(doc.root_element(), "Records").ok_or_else(|| ExtractError::MissingRecords {
            path: path.to_path_buf(),
        })?;
    Ok(container
        .children()
        .filter(|n| n.has_tag_name("Record"))
        .collect())
}

/// Required child text; missing or empty yields `RecordFieldMissing`.
pub fn require_text<'a>(
    node: Node<'a, '_>,
    tag: &'static str,
    path: &Path,
) -> Result<&'a str, ExtractError> {
    child_text(node, tag).ok_or_else(|| ExtractError::RecordFieldMissing {
        tag,
        path: path.to_path_buf(),
    })
}

/// Required child text parsed as an integer.
pub fn require_i64(node: Node, tag: &'static str, path: &Path) -> Result<i64, ExtractError> {
    let text = require_text(node, tag, path)?;
    text.trim()
        .parse::<i64>()
        .map_err(|_| ExtractError::BadFieldValue {
            tag,
            value: text.to_string(),
            path: path.to_path_buf(),
        })
}

/// Required child text parsed as a float.
pub fn require_f64(node: Node, tag: &'static str, path: &Path) -> Result<f64, ExtractError> {
    let text = require_text(node, tag, path)?;
    text.trim()
        .parse::<f64>()
        .map_err(|_| ExtractError::BadFieldValue {
            tag,
            value: text.to_string(),
            path: path.to_path_buf(),
        })
}

/// Optional child text parsed as an integer; absent or unparsable is `None`.
pub fn optional_i64(node: Node, tag: &str) -> Option<i64> {
    child_text(node, tag).and_then(|t| t.trim().parse::<i64>().ok())
}

/// Whether a tag's text carries any word character. Placeholder records are
/// exported with blank or whitespace-only name tags.
pub fn tag_has_content(text: Option<&str>) -> bool {
    text.is_some_and(|t| t.chars().any(|c| c.is_alphanumeric() || c == '_'))
}
