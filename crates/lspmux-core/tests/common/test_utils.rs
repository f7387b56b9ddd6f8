use std::sync::Arc;

use lspmux_core::rpc::{RpcConfig, RpcEngine};
use lspmux_core::transport::{
    MemoryConnector, MemoryPeer, MessageTransport, Transport, TransportOptions, memory_pair,
};
use lspmux_core::LspSession;

use super::mock_lsp::ScriptedServer;

/// Transport options without keepalive traffic.
pub fn quiet_options() -> TransportOptions {
    TransportOptions {
        keepalive_interval: None,
        ..TransportOptions::default()
    }
}

/// A disconnected in-memory transport and its server side.
pub fn memory_transport() -> (Arc<Transport<MemoryConnector>>, MemoryPeer) {
    let (connector, peer) = memory_pair();
    (Arc::new(Transport::new(connector, quiet_options())), peer)
}

/// An engine over an open in-memory transport.
#[allow(clippy::unwrap_used)]
pub async fn connected_engine(config: RpcConfig) -> (RpcEngine, ScriptedServer) {
    let (transport, peer) = memory_transport();
    transport.connect().await.unwrap();
    let engine = RpcEngine::new(transport, config);
    (engine, ScriptedServer::new(peer))
}

/// A session over an open in-memory transport, before `initialize`.
#[allow(clippy::unwrap_used)]
pub async fn connected_session() -> (LspSession, ScriptedServer) {
    let (transport, peer) = memory_transport();
    transport.connect().await.unwrap();
    let session = LspSession::new(transport, RpcConfig::default());
    (session, ScriptedServer::new(peer))
}
