//! Subcommand implementations.

use std::path::Path;

use anyhow::{Context, Result};
use lsp_types::{DocumentSymbolParams, TextDocumentIdentifier};
use lspmux_core::{LspSession, SessionConfig};
use serde_json::json;

/// Print the effective configuration.
pub fn show_config(config: &SessionConfig) -> Result<()> {
    let text = config
        .to_toml()
        .context("failed to serialize configuration")?;
    print!("{text}");
    Ok(())
}

/// Handshake and print what the server announced.
pub async fn capabilities(config: &SessionConfig) -> Result<()> {
    let session = start(config).await?;

    let report = json!({
        "server": session.server_info(),
        "syncKind": session.sync_kind().to_string(),
        "capabilities": session.capabilities().unwrap_or_default().raw(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    finish(&session).await
}

/// Open `file` and print its document symbols.
pub async fn symbols(config: &SessionConfig, file: &Path) -> Result<()> {
    let path = file
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", file.display()))?;
    let session = start(config).await?;

    let uri = session
        .open_file(&path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;

    let symbols = session
        .document_symbol(
            DocumentSymbolParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
                work_done_progress_params: lsp_types::WorkDoneProgressParams::default(),
                partial_result_params: lsp_types::PartialResultParams::default(),
            },
            None,
        )
        .await
        .context("textDocument/documentSymbol failed")?;
    println!("{}", serde_json::to_string_pretty(&symbols)?);

    if let Err(e) = session.did_close(&uri) {
        tracing::debug!(error = %e, "didClose not delivered");
    }
    finish(&session).await
}

async fn start(config: &SessionConfig) -> Result<LspSession> {
    tracing::debug!(transport = %config.transport.kind, "starting session");
    LspSession::start(config)
        .await
        .context("failed to start language server session")
}

async fn finish(session: &LspSession) -> Result<()> {
    let outcome = session.shutdown().await;
    session.disconnect().await;
    outcome.context("language server shutdown failed")
}
