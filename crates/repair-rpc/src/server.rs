//! The repair queue RPC server: accepts mutual-TLS connections, authorizes
//! the peer, then serves framed requests against a [`QueueMap`] until the
//! connection closes.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use repairqueue::QueueMap;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;

use crate::auth::{NodeId, PeerAllowlist};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::protocol::{Request, Response, ServerCodec, WireError};

/// A running repair queue endpoint.
pub struct Server {
    queues: Arc<QueueMap>,
    acceptor: TlsAcceptor,
    allowlist: PeerAllowlist,
}

impl Server {
    /// Construct a server over `queues`, accepting connections per
    /// `acceptor`'s TLS configuration and `allowlist`'s node-id policy.
    pub fn new(queues: Arc<QueueMap>, acceptor: TlsAcceptor, allowlist: PeerAllowlist) -> Server {
        Server {
            queues,
            acceptor,
            allowlist,
        }
    }

    /// Bind `addr` and serve connections until the process is stopped.
    /// Each accepted connection is handled on its own task; a failure on
    /// one connection never affects another.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "repair queue endpoint listening");
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream, peer_addr).await {
                    tracing::warn!(%peer_addr, error = %err, "connection ended with an error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let tls_stream = self.acceptor.accept(stream).await?;

        let peer_id = {
            let (_, session) = tls_stream.get_ref();
            let certs = session.peer_certificates().ok_or(Error::Unauthorized)?;
            let leaf = certs.first().ok_or(Error::Unauthorized)?;
            NodeId::from_certificate(leaf)
        };
        self.allowlist.authorize(peer_id)?;
        tracing::debug!(%peer_addr, peer = %peer_id, "peer authorized");

        let mut framed = Framed::new(tls_stream, ServerCodec::default());
        while let Some(frame) = framed.next().await {
            let request: Request = frame?;
            let response = self.respond(request).await;
            framed.send(response).await?;
        }
        Ok(())
    }

    async fn respond(&self, request: Request) -> Response {
        let result = dispatch::dispatch(&self.queues, request.call).await;
        Response {
            id: request.id,
            result: result.map_err(|e| WireError::from(&e)),
        }
    }
}
