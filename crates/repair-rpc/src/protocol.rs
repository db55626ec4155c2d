//! Wire types and framing for the repair queue RPC surface. Messages are
//! MessagePack-encoded (`rmp-serde`) and sent over length-delimited frames
//! (`tokio_util::codec::LengthDelimitedCodec`), one request or response per
//! frame.

use std::io;

use bytes::{Bytes, BytesMut};
use repairqueue::{Job, PlacementId, QueueStat};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::Error;

/// One of the ten queue operations exposed over the wire, carrying its own
/// parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Call {
    Push { placement: PlacementId, job: Job },
    PushBatch { placement: PlacementId, jobs: Vec<Job> },
    Pop { placement: PlacementId },
    Peek { placement: PlacementId },
    Len { placement: PlacementId },
    Clean { placement: PlacementId, before: i64 },
    Trim { placement: PlacementId, health_greater_than: f64 },
    Stat { placement: PlacementId },
    TrimPlacement { placement: PlacementId, health_greater_than: f64 },
    Destroy { placement: PlacementId },
}

/// The successful outcome of a [`Call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Job(Option<Job>),
    Jobs(Vec<Job>),
    Len { repair_len: usize, retry_len: usize },
    Stat(QueueStat),
    Ack,
}

/// Wire-safe mirror of [`Error`]'s variants that carry no non-serializable
/// payload (TLS/IO errors are collapsed to `Io` with their message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireError {
    NotFound,
    Corrupt(String),
    Capacity,
    Cancelled,
    Unauthorized,
    InvalidArgument(String),
    Io(String),
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        match err {
            Error::NotFound => WireError::NotFound,
            Error::Corrupt(msg) => WireError::Corrupt(msg.clone()),
            Error::Capacity => WireError::Capacity,
            Error::Cancelled => WireError::Cancelled,
            Error::Unauthorized => WireError::Unauthorized,
            Error::InvalidArgument(msg) => WireError::InvalidArgument(msg.clone()),
            Error::Io(err) => WireError::Io(err.to_string()),
            Error::Tls(err) => WireError::Io(err.to_string()),
        }
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::NotFound => Error::NotFound,
            WireError::Corrupt(msg) => Error::Corrupt(msg),
            WireError::Capacity => Error::Capacity,
            WireError::Cancelled => Error::Cancelled,
            WireError::Unauthorized => Error::Unauthorized,
            WireError::InvalidArgument(msg) => Error::InvalidArgument(msg),
            WireError::Io(msg) => Error::Io(io::Error::new(io::ErrorKind::Other, msg)),
        }
    }
}

/// A request envelope. `id` lets a client match out-of-order responses on a
/// single multiplexed stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub call: Call,
}

/// A response envelope, echoing the request's `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<Reply, WireError>,
}

/// Frames a connection as length-delimited MessagePack messages, decoding
/// `Rx` values and encoding `Tx` values. The server's side of a connection
/// uses `MessageCodec<Request, Response>`; a client uses the mirror image.
pub struct MessageCodec<Rx, Tx> {
    inner: LengthDelimitedCodec,
    _marker: std::marker::PhantomData<(Rx, Tx)>,
}

impl<Rx, Tx> Default for MessageCodec<Rx, Tx> {
    fn default() -> Self {
        MessageCodec {
            inner: LengthDelimitedCodec::new(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<Rx, Tx: Serialize> Encoder<Tx> for MessageCodec<Rx, Tx> {
    type Error = io::Error;

    fn encode(&mut self, item: Tx, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload =
            rmp_serde::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.encode(Bytes::from(payload), dst)
    }
}

impl<Rx: for<'de> Deserialize<'de>, Tx> Decoder for MessageCodec<Rx, Tx> {
    type Item = Rx;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Rx>, Self::Error> {
        let Some(frame) = self.inner.decode(src)? else {
            return Ok(None);
        };
        let item = rmp_serde::from_slice(&frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(item))
    }
}

/// The server side of a connection: decodes requests, encodes responses.
pub type ServerCodec = MessageCodec<Request, Response>;

/// The client side of a connection: decodes responses, encodes requests.
pub type ClientCodec = MessageCodec<Response, Request>;
