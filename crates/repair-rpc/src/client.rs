//! A minimal client for the repair queue endpoint, used by integration
//! tests and by repair workers that need to reach a remote placement's
//! queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use repairqueue::{Job, PlacementId, QueueStat};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;

use crate::error::{Error, Result};
use crate::protocol::{Call, ClientCodec, Reply, Request};

/// A connection to one remote repair queue endpoint.
pub struct Client {
    framed: Mutex<Framed<TlsStream<TcpStream>, ClientCodec>>,
    next_id: AtomicU64,
}

impl Client {
    /// Connect to `addr`, performing the mutual-TLS handshake against
    /// `server_name` (the name the server's certificate is expected to
    /// cover).
    pub async fn connect(
        addr: SocketAddr,
        server_name: ServerName<'static>,
        connector: TlsConnector,
    ) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        let tls_stream = connector.connect(server_name, stream).await?;
        Ok(Client {
            framed: Mutex::new(Framed::new(tls_stream, ClientCodec::default())),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, call: Call) -> Result<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut framed = self.framed.lock().await;
        framed.send(Request { id, call }).await?;
        loop {
            let response = framed
                .next()
                .await
                .ok_or_else(|| Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before a response arrived",
                )))??;
            if response.id != id {
                continue; // stale response from a prior call timing out; drop it
            }
            return response.result.map_err(Error::from);
        }
    }

    /// Push one job; returns the evicted job, if capacity forced one out.
    pub async fn push(&self, placement: PlacementId, job: Job) -> Result<Option<Job>> {
        match self.call(Call::Push { placement, job }).await? {
            Reply::Job(job) => Ok(job),
            _ => Err(Error::Corrupt("unexpected reply to Push".into())),
        }
    }

    /// Push a batch of jobs; returns every job evicted as a result.
    pub async fn push_batch(&self, placement: PlacementId, jobs: Vec<Job>) -> Result<Vec<Job>> {
        match self.call(Call::PushBatch { placement, jobs }).await? {
            Reply::Jobs(jobs) => Ok(jobs),
            _ => Err(Error::Corrupt("unexpected reply to PushBatch".into())),
        }
    }

    /// Pop the highest-priority job, if any.
    pub async fn pop(&self, placement: PlacementId) -> Result<Option<Job>> {
        match self.call(Call::Pop { placement }).await? {
            Reply::Job(job) => Ok(job),
            _ => Err(Error::Corrupt("unexpected reply to Pop".into())),
        }
    }

    /// Read-only equivalent of [`Client::pop`].
    pub async fn peek(&self, placement: PlacementId) -> Result<Option<Job>> {
        match self.call(Call::Peek { placement }).await? {
            Reply::Job(job) => Ok(job),
            _ => Err(Error::Corrupt("unexpected reply to Peek".into())),
        }
    }

    /// `(repair_len, retry_len)` for the given placement.
    pub async fn len(&self, placement: PlacementId) -> Result<(usize, usize)> {
        match self.call(Call::Len { placement }).await? {
            Reply::Len {
                repair_len,
                retry_len,
            } => Ok((repair_len, retry_len)),
            _ => Err(Error::Corrupt("unexpected reply to Len".into())),
        }
    }

    /// Drop entries older than `before`.
    pub async fn clean(&self, placement: PlacementId, before: i64) -> Result<()> {
        self.call(Call::Clean { placement, before }).await?;
        Ok(())
    }

    /// Drop entries above the given health threshold.
    pub async fn trim(&self, placement: PlacementId, health_greater_than: f64) -> Result<()> {
        self.call(Call::Trim {
            placement,
            health_greater_than,
        })
        .await?;
        Ok(())
    }

    /// A point-in-time summary of the given placement's queue.
    pub async fn stat(&self, placement: PlacementId) -> Result<QueueStat> {
        match self.call(Call::Stat { placement }).await? {
            Reply::Stat(stat) => Ok(stat),
            _ => Err(Error::Corrupt("unexpected reply to Stat".into())),
        }
    }

    /// Trim an entire placement's queue in one call, used by operators
    /// retiring a placement.
    pub async fn trim_placement(&self, placement: PlacementId, health_greater_than: f64) -> Result<()> {
        self.call(Call::TrimPlacement {
            placement,
            health_greater_than,
        })
        .await?;
        Ok(())
    }

    /// Destroy a placement's queue outright.
    pub async fn destroy(&self, placement: PlacementId) -> Result<()> {
        self.call(Call::Destroy { placement }).await?;
        Ok(())
    }
}
