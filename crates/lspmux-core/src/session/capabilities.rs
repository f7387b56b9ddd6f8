//! Negotiated server capabilities and the text-sync strategy derived from them.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Result;

/// How document edits are sent after `didOpen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncKind {
    /// The server does not want change notifications.
    None = 0,
    /// Every change carries the whole document text.
    #[default]
    Full = 1,
    /// Changes carry incremental edits.
    Incremental = 2,
}

impl SyncKind {
    /// Map a wire value; unknown kinds yield `None`.
    #[must_use]
    pub const fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Full),
            2 => Some(Self::Incremental),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Full => "full",
            Self::Incremental => "incremental",
        };
        f.write_str(name)
    }
}

/// Capability record from the `initialize` response, kept verbatim.
///
/// Only `textDocumentSync` is interpreted; every other field is preserved
/// and reachable through [`ServerCapabilities::get`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerCapabilities {
    raw: Map<String, Value>,
}

impl ServerCapabilities {
    /// Wrap a raw capability object.
    #[must_use]
    pub const fn new(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    /// Extract `capabilities` from an `initialize` result.
    ///
    /// A missing or non-object field yields an empty record.
    #[must_use]
    pub fn from_initialize_result(result: &Value) -> Self {
        match result.get("capabilities") {
            Some(Value::Object(raw)) => Self::new(raw.clone()),
            _ => Self::default(),
        }
    }

    /// The raw capability object.
    #[must_use]
    pub const fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Look up any capability field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.raw.get(field)
    }

    /// Whether a provider field is present and not `false`/`null`.
    #[must_use]
    pub fn supports(&self, provider: &str) -> bool {
        !matches!(
            self.raw.get(provider),
            None | Some(Value::Null | Value::Bool(false))
        )
    }

    /// Derive the text-sync strategy from `textDocumentSync`.
    ///
    /// A bare number is the kind itself; an object is inspected for its
    /// `change` field; anything else means [`SyncKind::Full`].
    #[must_use]
    pub fn sync_kind(&self) -> SyncKind {
        let wire = match self.raw.get("textDocumentSync") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::Object(options)) => match options.get("change") {
                Some(Value::Number(n)) => n.as_i64(),
                _ => return SyncKind::default(),
            },
            _ => return SyncKind::default(),
        };

        match wire.and_then(SyncKind::from_wire) {
            Some(kind) => kind,
            None => {
                warn!(value = ?wire, "unknown textDocumentSync kind, assuming full sync");
                SyncKind::Full
            }
        }
    }

    /// Whether the server asked for the full text on `didSave`.
    #[must_use]
    pub fn save_includes_text(&self) -> bool {
        self.raw
            .get("textDocumentSync")
            .and_then(|sync| sync.get("save"))
            .and_then(|save| save.get("includeText"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Decode into the typed `lsp_types` representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not match the LSP schema.
    pub fn typed(&self) -> Result<lsp_types::ServerCapabilities> {
        Ok(serde_json::from_value(Value::Object(self.raw.clone()))?)
    }
}
