//! Client side of the `initialize` handshake.

use lsp_types::{
    ClientCapabilities, ClientInfo, GeneralClientCapabilities, InitializeParams, MarkupKind,
    PositionEncodingKind, WorkspaceFolder,
};
use serde_json::json;

use super::documents::path_to_uri;
use crate::config::ClientConfig;
use crate::error::Result;

/// Capabilities this client announces.
///
/// Covers the document lifecycle notifications and every feature request the
/// session exposes. Dynamic registration is declined everywhere.
#[must_use]
pub fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        general: Some(GeneralClientCapabilities {
            position_encodings: Some(vec![PositionEncodingKind::UTF16]),
            ..Default::default()
        }),
        text_document: Some(lsp_types::TextDocumentClientCapabilities {
            synchronization: Some(lsp_types::TextDocumentSyncClientCapabilities {
                dynamic_registration: Some(false),
                did_save: Some(true),
                ..Default::default()
            }),
            completion: Some(lsp_types::CompletionClientCapabilities {
                dynamic_registration: Some(false),
                ..Default::default()
            }),
            hover: Some(lsp_types::HoverClientCapabilities {
                dynamic_registration: Some(false),
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
            }),
            signature_help: Some(lsp_types::SignatureHelpClientCapabilities {
                dynamic_registration: Some(false),
                ..Default::default()
            }),
            definition: Some(lsp_types::GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(true),
            }),
            references: Some(lsp_types::ReferenceClientCapabilities {
                dynamic_registration: Some(false),
            }),
            rename: Some(lsp_types::RenameClientCapabilities {
                dynamic_registration: Some(false),
                ..Default::default()
            }),
            document_symbol: Some(lsp_types::DocumentSymbolClientCapabilities {
                dynamic_registration: Some(false),
                hierarchical_document_symbol_support: Some(true),
                ..Default::default()
            }),
            formatting: Some(lsp_types::DocumentFormattingClientCapabilities {
                dynamic_registration: Some(false),
            }),
            range_formatting: serde_json::from_value(json!({ "dynamicRegistration": false }))
                .ok(),
            semantic_tokens: semantic_tokens_capabilities(),
            publish_diagnostics: Some(lsp_types::PublishDiagnosticsClientCapabilities {
                related_information: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }),
        workspace: Some(lsp_types::WorkspaceClientCapabilities {
            workspace_folders: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Semantic token capabilities, declared in wire form.
fn semantic_tokens_capabilities() -> Option<lsp_types::SemanticTokensClientCapabilities> {
    serde_json::from_value(json!({
        "dynamicRegistration": false,
        "requests": { "range": true, "full": true },
        "tokenTypes": [
            "namespace", "type", "class", "enum", "interface", "struct",
            "typeParameter", "parameter", "variable", "property", "enumMember",
            "function", "method", "macro", "keyword", "comment", "string",
            "number", "operator"
        ],
        "tokenModifiers": [
            "declaration", "definition", "readonly", "static", "deprecated",
            "documentation"
        ],
        "formats": ["relative"]
    }))
    .ok()
}

/// Build `initialize` params from the client configuration.
///
/// # Errors
///
/// Returns an error if the workspace root cannot be expressed as a URI.
pub fn initialize_params(client: &ClientConfig) -> Result<InitializeParams> {
    let workspace_folders = match &client.root {
        Some(root) => Some(vec![WorkspaceFolder {
            uri: path_to_uri(root)?,
            name: root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("workspace")
                .to_string(),
        }]),
        None => None,
    };

    Ok(InitializeParams {
        process_id: Some(std::process::id()),
        initialization_options: client.initialization_options.clone(),
        capabilities: client_capabilities(),
        client_info: Some(ClientInfo {
            name: client.name.clone(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        workspace_folders,
        ..Default::default()
    })
}
