//! LSP session client.
//!
//! [`LspSession`] layers the protocol conventions of the Language Server
//! Protocol over an [`RpcEngine`]: the `initialize` handshake and capability
//! negotiation, text-sync shaping, document lifecycle notifications and a
//! typed wrapper for every feature request.
//!
//! The session does not enforce the `initialized`-before-requests ordering.
//! A feature request issued too early is still sent; the first one logs a
//! warning.

mod capabilities;
mod documents;
mod init;

use std::path::Path;
use std::sync::{Arc, Mutex};

pub use capabilities::{ServerCapabilities, SyncKind};
pub use documents::{DocumentStore, OpenDocument, detect_language, path_to_uri};
pub use init::{client_capabilities, initialize_params};
use lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument, Exit,
    Initialized, LogMessage, Notification, PublishDiagnostics,
};
use lsp_types::request::{
    Completion, DocumentSymbolRequest, Formatting, GotoDefinition, HoverRequest, Initialize,
    RangeFormatting, References, Rename, Request, SemanticTokensFullRequest,
    SemanticTokensRangeRequest, Shutdown, SignatureHelpRequest,
};
use lsp_types::{
    CompletionParams, CompletionResponse, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    DocumentFormattingParams, DocumentRangeFormattingParams, DocumentSymbolParams,
    DocumentSymbolResponse, GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverParams,
    InitializedParams, Location, LogMessageParams, MessageType, PublishDiagnosticsParams,
    ReferenceParams, RenameParams, SemanticTokensParams, SemanticTokensRangeParams,
    SemanticTokensRangeResult, SemanticTokensResult, ServerInfo, SignatureHelp,
    SignatureHelpParams, TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextEdit, Uri, VersionedTextDocumentIdentifier, WorkspaceEdit,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::rpc::{CancellationToken, PendingCall, RequestOptions, RpcConfig, RpcEngine};
use crate::subscription::{Subscription, lock};
use crate::transport::MessageTransport;

/// Tracing target for `window/logMessage` forwarded from the server.
pub const SERVER_LOG_TARGET: &str = "lspmux::server";

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `initialize` has not succeeded yet.
    Uninitialized,
    /// `initialize` is in flight, or answered but `initialized` not yet sent.
    Initializing,
    /// The handshake is complete.
    Ready,
    /// `shutdown` is in flight.
    ShuttingDown,
    /// `exit` has been sent.
    Shutdown,
}

impl SessionState {
    /// Check if the handshake is complete.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the session was shut down or is shutting down.
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Shutdown)
    }
}

struct Negotiated {
    state: SessionState,
    capabilities: Option<ServerCapabilities>,
    sync_kind: SyncKind,
    server_info: Option<ServerInfo>,
    order_warned: bool,
}

/// An LSP client session over one transport.
pub struct LspSession {
    transport: Arc<dyn MessageTransport>,
    engine: RpcEngine,
    negotiated: Mutex<Negotiated>,
    documents: Mutex<DocumentStore>,
    log_forwarding: Option<Subscription>,
}

impl std::fmt::Debug for LspSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let negotiated = lock(&self.negotiated);
        f.debug_struct("LspSession")
            .field("state", &negotiated.state)
            .field("sync_kind", &negotiated.sync_kind)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl LspSession {
    /// Create a session over `transport`. The transport is not connected.
    #[must_use]
    pub fn new(transport: Arc<dyn MessageTransport>, config: RpcConfig) -> Self {
        let engine = RpcEngine::new(Arc::clone(&transport), config);
        let log_forwarding = forward_log_messages(&engine);

        Self {
            transport,
            engine,
            negotiated: Mutex::new(Negotiated {
                state: SessionState::Uninitialized,
                capabilities: None,
                sync_kind: SyncKind::default(),
                server_info: None,
                order_warned: false,
            }),
            documents: Mutex::new(DocumentStore::new()),
            log_forwarding: Some(log_forwarding),
        }
    }

    /// Create a session from configuration. The transport is not connected.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let transport = config.transport.build(config.client.root.as_deref())?;
        Ok(Self::new(transport, config.rpc_config()))
    }

    /// Connect and run the full handshake: `initialize`, then `initialized`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LspInitFailed`] if the handshake fails, or the
    /// connection error.
    pub async fn start(config: &SessionConfig) -> Result<Self> {
        let session = Self::from_config(config)?;
        session.connect().await?;

        let params = initialize_params(&config.client)?;
        session
            .initialize(params)
            .await
            .map_err(|e| Error::LspInitFailed {
                message: format!("initialize request failed: {e}"),
            })?;
        session.initialized().map_err(|e| Error::LspInitFailed {
            message: format!("initialized notification failed: {e}"),
        })?;

        Ok(session)
    }

    /// Open the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await
    }

    /// Close the transport without the shutdown handshake.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    /// Underlying engine, for requests this session has no wrapper for.
    #[must_use]
    pub const fn engine(&self) -> &RpcEngine {
        &self.engine
    }

    /// Underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.transport
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        lock(&self.negotiated).state
    }

    /// Capabilities from the last successful `initialize`.
    #[must_use]
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        lock(&self.negotiated).capabilities.clone()
    }

    /// Negotiated text-sync strategy; [`SyncKind::Full`] before `initialize`.
    #[must_use]
    pub fn sync_kind(&self) -> SyncKind {
        lock(&self.negotiated).sync_kind
    }

    /// `serverInfo` from the `initialize` result, if the server sent it.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        lock(&self.negotiated).server_info.clone()
    }

    /// State of an open document.
    #[must_use]
    pub fn document(&self, uri: &Uri) -> Option<OpenDocument> {
        lock(&self.documents).get(uri).cloned()
    }

    /// Issue `initialize` with the engine's default deadline.
    ///
    /// # Errors
    ///
    /// Returns the request failure; the session stays uninitialized.
    pub async fn initialize(
        &self,
        params: lsp_types::InitializeParams,
    ) -> Result<ServerCapabilities> {
        self.initialize_with(params, RequestOptions::default()).await
    }

    /// Issue `initialize` and record the negotiated capabilities.
    ///
    /// The text-sync strategy is derived here, before any document can be
    /// opened.
    ///
    /// # Errors
    ///
    /// Returns the request failure; the session stays uninitialized.
    pub async fn initialize_with(
        &self,
        params: lsp_types::InitializeParams,
        options: RequestOptions,
    ) -> Result<ServerCapabilities> {
        {
            let mut negotiated = lock(&self.negotiated);
            if negotiated.state != SessionState::Uninitialized {
                warn!(state = ?negotiated.state, "initialize sent again");
            }
            negotiated.state = SessionState::Initializing;
        }

        debug!("sending initialize request");
        let result = match self
            .engine
            .request(Initialize::METHOD, params, options)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                lock(&self.negotiated).state = SessionState::Uninitialized;
                return Err(e);
            }
        };

        let capabilities = ServerCapabilities::from_initialize_result(&result);
        let sync_kind = capabilities.sync_kind();
        let server_info = result
            .get("serverInfo")
            .and_then(|info| ServerInfo::deserialize(info).ok());

        info!(
            server = server_info.as_ref().map_or("unknown", |i| i.name.as_str()),
            %sync_kind,
            "server initialized"
        );

        let mut negotiated = lock(&self.negotiated);
        negotiated.capabilities = Some(capabilities.clone());
        negotiated.sync_kind = sync_kind;
        negotiated.server_info = server_info;
        drop(negotiated);

        Ok(capabilities)
    }

    /// Send `initialized`, completing the handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not open.
    pub fn initialized(&self) -> Result<()> {
        self.engine.notify(Initialized::METHOD, InitializedParams {})?;
        lock(&self.negotiated).state = SessionState::Ready;
        Ok(())
    }

    /// Send `shutdown`, then `exit` whatever the shutdown outcome.
    ///
    /// # Errors
    ///
    /// Returns the `shutdown` failure if there was one, otherwise an `exit`
    /// send failure.
    pub async fn shutdown(&self) -> Result<()> {
        lock(&self.negotiated).state = SessionState::ShuttingDown;

        debug!("sending shutdown request");
        let outcome = self
            .engine
            .request(Shutdown::METHOD, (), RequestOptions::default())
            .await
            .map(|_| ());
        if let Err(e) = &outcome {
            warn!(error = %e, "shutdown request failed, sending exit anyway");
        }

        let exit = self.engine.notify(Exit::METHOD, ());
        if let Err(e) = &exit {
            debug!(error = %e, "exit notification not delivered");
        }

        lock(&self.negotiated).state = SessionState::Shutdown;
        lock(&self.documents).clear();
        outcome.and(exit)
    }

    /// Send `textDocument/didOpen` and start tracking the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not open.
    pub fn did_open(&self, item: TextDocumentItem) -> Result<()> {
        let uri = item.uri.clone();
        let language_id = item.language_id.clone();
        let version = item.version;

        self.engine.notify(
            DidOpenTextDocument::METHOD,
            DidOpenTextDocumentParams {
                text_document: item,
            },
        )?;
        lock(&self.documents).open(&uri, &language_id, version);
        Ok(())
    }

    /// Read a file from disk and open it at version 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the transport is not
    /// open.
    pub async fn open_file(&self, path: &Path) -> Result<Uri> {
        let text = tokio::fs::read_to_string(path).await?;
        let uri = path_to_uri(path)?;
        self.did_open(TextDocumentItem {
            uri: uri.clone(),
            language_id: detect_language(path).to_string(),
            version: 1,
            text,
        })?;
        Ok(uri)
    }

    /// Send `textDocument/didChange` shaped by the negotiated [`SyncKind`].
    ///
    /// `text` is the whole new document; `edits` are the incremental changes
    /// that produced it. Full sync sends `text`; incremental sync sends
    /// `edits`, or `text` when there are none; `None` sync sends nothing.
    ///
    /// Returns the version sent, or `None` when nothing was sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not open.
    pub fn did_change(
        &self,
        uri: &Uri,
        text: &str,
        edits: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<Option<i32>> {
        let sync_kind = self.sync_kind();
        let content_changes = match sync_kind {
            SyncKind::None => {
                trace!(uri = uri.as_str(), "server takes no change notifications");
                return Ok(None);
            }
            SyncKind::Incremental if !edits.is_empty() => edits,
            SyncKind::Full | SyncKind::Incremental => vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: text.to_string(),
            }],
        };

        // Held across the send so concurrent changes cannot share a version.
        let mut documents = lock(&self.documents);
        let version = documents.next_version(uri).unwrap_or_else(|| {
            warn!(uri = uri.as_str(), "change for a document that was never opened");
            1
        });

        self.engine.notify(
            DidChangeTextDocument::METHOD,
            DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: uri.clone(),
                    version,
                },
                content_changes,
            },
        )?;

        if !documents.set_version(uri, version) {
            documents.open(uri, detect_language(Path::new(uri.as_str())), version);
        }
        drop(documents);
        Ok(Some(version))
    }

    /// Send `textDocument/didSave`.
    ///
    /// `text` is included only when the server asked for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not open.
    pub fn did_save(&self, uri: &Uri, text: Option<&str>) -> Result<()> {
        let include_text = self
            .capabilities()
            .is_some_and(|caps| caps.save_includes_text());

        self.engine.notify(
            DidSaveTextDocument::METHOD,
            DidSaveTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
                text: text.filter(|_| include_text).map(str::to_string),
            },
        )
    }

    /// Send `textDocument/didClose` and stop tracking the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not open.
    pub fn did_close(&self, uri: &Uri) -> Result<()> {
        let mut documents = lock(&self.documents);
        self.engine.notify(
            DidCloseTextDocument::METHOD,
            DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
            },
        )?;
        documents.close(uri);
        drop(documents);
        Ok(())
    }

    /// Subscribe to `textDocument/publishDiagnostics`.
    ///
    /// Notifications whose params do not decode are logged and skipped.
    pub fn on_publish_diagnostics<F>(&self, callback: F) -> Subscription
    where
        F: Fn(PublishDiagnosticsParams) + Send + Sync + 'static,
    {
        self.engine
            .on_notification(PublishDiagnostics::METHOD, move |params| {
                match PublishDiagnosticsParams::deserialize(params) {
                    Ok(diagnostics) => callback(diagnostics),
                    Err(e) => warn!(error = %e, "dropping malformed publishDiagnostics"),
                }
            })
    }

    /// Issue any typed LSP request.
    pub fn request<R: Request>(
        &self,
        params: R::Params,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<R::Result> {
        self.warn_if_not_ready(R::METHOD);
        self.engine
            .request_as(R::METHOD, params, RequestOptions::with_cancellation(cancel))
    }

    fn warn_if_not_ready(&self, method: &str) {
        let mut negotiated = lock(&self.negotiated);
        if negotiated.state.is_ready() || negotiated.order_warned {
            return;
        }
        negotiated.order_warned = true;
        let state = negotiated.state;
        drop(negotiated);
        warn!(method, ?state, "request sent before the initialized notification");
    }

    /// `textDocument/completion`.
    pub fn completion(
        &self,
        params: CompletionParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<CompletionResponse>> {
        self.request::<Completion>(params, cancel)
    }

    /// `textDocument/hover`.
    pub fn hover(
        &self,
        params: HoverParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<Hover>> {
        self.request::<HoverRequest>(params, cancel)
    }

    /// `textDocument/signatureHelp`.
    pub fn signature_help(
        &self,
        params: SignatureHelpParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<SignatureHelp>> {
        self.request::<SignatureHelpRequest>(params, cancel)
    }

    /// `textDocument/definition`.
    pub fn definition(
        &self,
        params: GotoDefinitionParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<GotoDefinitionResponse>> {
        self.request::<GotoDefinition>(params, cancel)
    }

    /// `textDocument/references`.
    pub fn references(
        &self,
        params: ReferenceParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<Vec<Location>>> {
        self.request::<References>(params, cancel)
    }

    /// `textDocument/rename`.
    pub fn rename(
        &self,
        params: RenameParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<WorkspaceEdit>> {
        self.request::<Rename>(params, cancel)
    }

    /// `textDocument/documentSymbol`.
    pub fn document_symbol(
        &self,
        params: DocumentSymbolParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<DocumentSymbolResponse>> {
        self.request::<DocumentSymbolRequest>(params, cancel)
    }

    /// `textDocument/formatting`.
    pub fn formatting(
        &self,
        params: DocumentFormattingParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<Vec<TextEdit>>> {
        self.request::<Formatting>(params, cancel)
    }

    /// `textDocument/rangeFormatting`.
    pub fn range_formatting(
        &self,
        params: DocumentRangeFormattingParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<Vec<TextEdit>>> {
        self.request::<RangeFormatting>(params, cancel)
    }

    /// `textDocument/semanticTokens/full`.
    pub fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<SemanticTokensResult>> {
        self.request::<SemanticTokensFullRequest>(params, cancel)
    }

    /// `textDocument/semanticTokens/range`.
    pub fn semantic_tokens_range(
        &self,
        params: SemanticTokensRangeParams,
        cancel: Option<CancellationToken>,
    ) -> PendingCall<Option<SemanticTokensRangeResult>> {
        self.request::<SemanticTokensRangeRequest>(params, cancel)
    }
}

impl Drop for LspSession {
    fn drop(&mut self) {
        if let Some(subscription) = self.log_forwarding.take() {
            subscription.unsubscribe();
        }
    }
}

/// Route `window/logMessage` into tracing at a matching level.
fn forward_log_messages(engine: &RpcEngine) -> Subscription {
    engine.on_notification(LogMessage::METHOD, |params: &Value| {
        let Ok(LogMessageParams { typ, message }) = LogMessageParams::deserialize(params) else {
            debug!("dropping malformed window/logMessage");
            return;
        };
        if typ == MessageType::ERROR {
            error!(target: SERVER_LOG_TARGET, "{message}");
        } else if typ == MessageType::WARNING {
            warn!(target: SERVER_LOG_TARGET, "{message}");
        } else if typ == MessageType::INFO {
            info!(target: SERVER_LOG_TARGET, "{message}");
        } else {
            debug!(target: SERVER_LOG_TARGET, "{message}");
        }
    })
}
