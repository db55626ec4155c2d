//! The k-of-N collector: a reusable fan-out primitive for the repair
//! worker. Runs candidate operations concurrently, stops as soon as enough
//! have succeeded or failed, and drops the rest in flight.

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;

/// One candidate operation: a thunk producing the future to run, boxed so
/// callers can pass a heterogeneous mix of closures for a single `collect`
/// call.
pub type Operation<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

/// Tuning for one [`collect`] call.
#[derive(Debug, Clone, Copy)]
pub struct CollectorConfig {
    /// Steady-state number of operations kept in flight.
    pub concurrency: usize,
    /// Extra operations dispatched beyond `concurrency` to absorb stragglers.
    pub long_tail: usize,
    /// Stop once this many candidates have succeeded.
    pub required_successes: usize,
    /// Stop once this many candidates have failed.
    pub required_failures: usize,
}

impl CollectorConfig {
    /// The maximum number of operations ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.concurrency + self.long_tail
    }
}

/// One candidate's outcome, tagged with its position in the original input
/// list so callers can map results back.
#[derive(Debug)]
pub struct Outcome<T, E> {
    /// The candidate's index in the slice passed to [`collect`].
    pub index: usize,
    /// The operation's result.
    pub result: Result<T, E>,
}

/// Run `operations[i]()` for each non-skipped candidate, up to
/// `config.max_in_flight()` concurrently, stopping as soon as
/// `required_successes` have succeeded or `required_failures` have failed.
/// `skip(i)` is consulted before dispatching candidate `i`; skipped
/// candidates are never run and never appear in the result. Operations
/// still in flight when the threshold is met are dropped (their futures are
/// never polled again) rather than awaited to completion. Results are
/// returned in completion order, each tagged with its original index.
pub async fn collect<T, E, S>(
    operations: Vec<Operation<T, E>>,
    skip: S,
    config: CollectorConfig,
) -> Vec<Outcome<T, E>>
where
    S: Fn(usize) -> bool,
{
    let mut pending: Vec<(usize, Operation<T, E>)> = operations
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !skip(*i))
        .collect();
    pending.reverse(); // pop() dispatches in original order

    let mut in_flight = FuturesUnordered::new();
    let mut results = Vec::new();
    let mut successes = 0usize;
    let mut failures = 0usize;

    dispatch(&mut in_flight, &mut pending, &config);

    while successes < config.required_successes && failures < config.required_failures {
        let Some((index, result)) = in_flight.next().await else {
            break; // no more candidates and nothing in flight: can't meet requirements
        };

        match &result {
            Ok(_) => successes += 1,
            Err(_) => failures += 1,
        }
        results.push(Outcome { index, result });

        if !pending.is_empty() {
            dispatch(&mut in_flight, &mut pending, &config);
        }
    }

    // Drop `in_flight` and any remaining `pending` here: superfluous
    // in-flight operations are cancelled simply by never polling them again.
    results
}

fn dispatch<T, E>(
    in_flight: &mut FuturesUnordered<BoxFuture<'static, (usize, Result<T, E>)>>,
    pending: &mut Vec<(usize, Operation<T, E>)>,
    config: &CollectorConfig,
) {
    while in_flight.len() < config.max_in_flight() {
        let Some((index, op)) = pending.pop() else {
            break;
        };
        let fut = op();
        in_flight.push(Box::pin(async move { (index, fut.await) }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn ok_op(index: usize) -> Operation<usize, &'static str> {
        Box::new(move || async move { Ok(index) }.boxed())
    }

    fn err_op(index: usize) -> Operation<usize, &'static str> {
        Box::new(move || async move { Err("boom") }.boxed())
    }

    #[tokio::test]
    async fn stops_after_required_successes() {
        let ops: Vec<_> = (0..5).map(ok_op).collect();
        let config = CollectorConfig {
            concurrency: 5,
            long_tail: 0,
            required_successes: 2,
            required_failures: 99,
        };
        let results = collect(ops, |_| false, config).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|o| o.result.is_ok()));
    }

    #[tokio::test]
    async fn stops_after_required_failures() {
        let ops: Vec<_> = (0..5).map(err_op).collect();
        let config = CollectorConfig {
            concurrency: 5,
            long_tail: 0,
            required_successes: 99,
            required_failures: 2,
        };
        let results = collect(ops, |_| false, config).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|o| o.result.is_err()));
    }

    #[tokio::test]
    async fn skipped_candidates_are_never_dispatched() {
        let ops: Vec<_> = (0..4).map(ok_op).collect();
        let config = CollectorConfig {
            concurrency: 4,
            long_tail: 0,
            required_successes: 2,
            required_failures: 99,
        };
        let results = collect(ops, |i| i == 0 || i == 1, config).await;
        assert!(results.iter().all(|o| o.index >= 2));
    }

    #[tokio::test]
    async fn mixed_outcomes_stop_once_either_threshold_is_met() {
        let ops: Vec<_> = vec![err_op(0), ok_op(1), ok_op(2), err_op(3), ok_op(4)];
        let config = CollectorConfig {
            concurrency: 5,
            long_tail: 0,
            required_successes: 2,
            required_failures: 5,
        };
        let results = collect(ops, |_| false, config).await;
        assert_eq!(results.iter().filter(|o| o.result.is_ok()).count(), 2);
    }

    #[test]
    fn max_in_flight_is_concurrency_plus_long_tail() {
        let config = CollectorConfig {
            concurrency: 1,
            long_tail: 1,
            required_successes: 10,
            required_failures: 10,
        };
        assert_eq!(config.max_in_flight(), 2);
    }
}
