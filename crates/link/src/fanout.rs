//! Bounded-concurrency fan-out.

use common::Result;
use futures::stream::{self, StreamExt};
use metrics::counter;
use std::future::Future;
use tracing::warn;

/// Drive `sends` with at most `concurrency` in flight and sum their counts.
///
/// Individual failures are tolerated; the first error is returned only when
/// no send succeeded.
pub async fn fan_out<I, Fut>(sends: I, concurrency: usize) -> Result<u64>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<u64>>,
{
    let mut results = stream::iter(sends).buffer_unordered(concurrency.max(1));

    let mut total = 0;
    let mut succeeded = 0usize;
    let mut first_error = None;
    while let Some(result) = results.next().await {
        match result {
            Ok(count) => {
                succeeded += 1;
                total += count;
            }
            Err(e) => {
                counter!("link_fanout_failures_total").increment(1);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) if succeeded == 0 => Err(e),
        _ => Ok(total),
    }
}

/// Await the fan-out when `ack` is set, otherwise detach it and return 0.
pub async fn deliver<Fut>(fanout: Fut, ack: bool, operation: &'static str) -> Result<u64>
where
    Fut: Future<Output = Result<u64>> + Send + 'static,
{
    if ack {
        return fanout.await;
    }

    tokio::spawn(async move {
        if let Err(e) = fanout.await {
            warn!(operation, "Detached fan-out failed: {}", e);
        }
    });
    Ok(0)
}
