//! Open document bookkeeping.
//!
//! Tracks which documents the server was told about and their versions so
//! change notifications carry monotonically increasing versions.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use lsp_types::Uri;

use crate::error::{Error, Result};

/// State of one open document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDocument {
    /// Language identifier sent with `didOpen`.
    pub language_id: String,
    /// Last version sent to the server.
    pub version: i32,
}

/// Open documents keyed by URI.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: HashMap<String, OpenDocument>,
}

impl DocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `didOpen`. Reopening resets the version.
    pub fn open(&mut self, uri: &Uri, language_id: &str, version: i32) {
        self.documents.insert(
            uri.as_str().to_string(),
            OpenDocument {
                language_id: language_id.to_string(),
                version,
            },
        );
    }

    /// Version the next change of an open document will carry.
    ///
    /// Returns `None` if the document is not open.
    #[must_use]
    pub fn next_version(&self, uri: &Uri) -> Option<i32> {
        self.documents.get(uri.as_str()).map(|doc| doc.version + 1)
    }

    /// Record a version the server has been sent.
    ///
    /// Returns `false` if the document is not open.
    pub fn set_version(&mut self, uri: &Uri, version: i32) -> bool {
        self.documents
            .get_mut(uri.as_str())
            .map(|doc| doc.version = version)
            .is_some()
    }

    /// Forget a document.
    pub fn close(&mut self, uri: &Uri) -> Option<OpenDocument> {
        self.documents.remove(uri.as_str())
    }

    /// State of an open document.
    #[must_use]
    pub fn get(&self, uri: &Uri) -> Option<&OpenDocument> {
        self.documents.get(uri.as_str())
    }

    /// Whether the document is open.
    #[must_use]
    pub fn is_open(&self, uri: &Uri) -> bool {
        self.documents.contains_key(uri.as_str())
    }

    /// Number of open documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether no document is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Forget every document.
    pub fn clear(&mut self) {
        self.documents.clear();
    }
}

/// Convert a file path to a `file://` URI.
///
/// # Errors
///
/// Returns [`Error::InvalidUri`] if the path cannot be expressed as a URI.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let uri_string = if cfg!(windows) {
        format!("file:///{}", path.display().to_string().replace('\\', "/"))
    } else {
        format!("file://{}", path.display())
    };
    Uri::from_str(&uri_string).map_err(|_| Error::InvalidUri(uri_string))
}

/// Detect the LSP language ID from a file path.
#[must_use]
pub fn detect_language(path: &Path) -> &'static str {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension {
        "rs" => "rust",
        "py" | "pyw" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "jsx" => "javascriptreact",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "java" => "java",
        "lua" => "lua",
        "sh" | "bash" | "zsh" => "shellscript",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "md" | "markdown" => "markdown",
        _ => "plaintext",
    }
}
