//! Maps wire [`Call`]s onto [`QueueMap`] operations. Split out from
//! [`crate::server`] so the request/response logic can be tested without a
//! TLS handshake.

use repairqueue::{Job, QueueMap};

use crate::error::Result;
use crate::protocol::{Call, Reply};

/// Execute one call against `queues`, creating a placement's queue lazily
/// where the operation implies one (every method except `TrimPlacement` and
/// `Destroy`, which only act on a queue that already exists).
pub async fn dispatch(queues: &QueueMap, call: Call) -> Result<Reply> {
    match call {
        Call::Push { placement, job } => {
            let queue = queues.get_or_create(placement);
            Ok(Reply::Job(queue.push(job)))
        }
        Call::PushBatch { placement, jobs } => {
            let queue = queues.get_or_create(placement);
            let evicted: Vec<Job> = queue.push_batch(jobs);
            Ok(Reply::Jobs(evicted))
        }
        Call::Pop { placement } => {
            let queue = queues.get_or_create(placement);
            Ok(Reply::Job(queue.pop()))
        }
        Call::Peek { placement } => {
            let queue = queues.get_or_create(placement);
            Ok(Reply::Job(queue.peek()))
        }
        Call::Len { placement } => {
            let queue = queues.get_or_create(placement);
            let (repair_len, retry_len) = queue.len();
            Ok(Reply::Len {
                repair_len,
                retry_len,
            })
        }
        Call::Clean { placement, before } => {
            let queue = queues.get_or_create(placement);
            queue.clean(before);
            Ok(Reply::Ack)
        }
        Call::Trim {
            placement,
            health_greater_than,
        } => {
            let queue = queues.get_or_create(placement);
            queue.trim(health_greater_than);
            Ok(Reply::Ack)
        }
        Call::Stat { placement } => {
            let queue = queues.get_or_create(placement);
            Ok(Reply::Stat(queue.stat()))
        }
        Call::TrimPlacement {
            placement,
            health_greater_than,
        } => {
            if let Some(queue) = queues.get(placement) {
                queue.trim(health_greater_than);
            }
            Ok(Reply::Ack)
        }
        Call::Destroy { placement } => {
            queues.remove(placement);
            Ok(Reply::Ack)
        }
    }
}
