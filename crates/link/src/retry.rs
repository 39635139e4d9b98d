//! Retry-with-eviction for calls addressed through a location cache.
//!
//! ```text
//!   Resolve ──► Call ──Done/Err──► Terminate
//!      ▲          │
//!      │        Miss
//!      │          ▼
//!      └──── EvictOnMiss ──(attempts exhausted)──► Terminate(NotFoundSession)
//! ```
//!
//! A re-resolution that yields the same target as the previous attempt stops
//! the loop: calling it again would only repeat the miss.

use common::{Error, Outcome, Result};
use metrics::counter;
use std::fmt::Debug;
use std::future::Future;
use tracing::debug;

/// Calls made per operation at most; sized leases per target match it.
pub const MAX_ATTEMPTS: usize = 2;

enum Step<K, T> {
    Resolve { previous: Option<K> },
    Call { target: K },
    EvictOnMiss { target: K },
    Terminate(Result<T>),
}

/// Run `call` against the target produced by `resolve`, evicting and
/// re-resolving once when the target answers with a miss.
pub async fn call_with_eviction<K, T, R, RFut, C, CFut, E>(
    mut resolve: R,
    mut call: C,
    mut evict: E,
) -> Result<T>
where
    K: PartialEq + Clone + Debug,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<K>>,
    C: FnMut(K) -> CFut,
    CFut: Future<Output = Result<Outcome<T>>>,
    E: FnMut(K),
{
    let mut attempts = 0;
    let mut step = Step::Resolve { previous: None };

    loop {
        step = match step {
            Step::Resolve { previous } => match resolve().await {
                Err(e) => Step::Terminate(Err(e)),
                Ok(target) if previous.as_ref() == Some(&target) => {
                    debug!("Re-resolved to the same target {:?}, giving up", target);
                    Step::Terminate(Err(Error::NotFoundSession))
                }
                Ok(target) => Step::Call { target },
            },
            Step::Call { target } => {
                attempts += 1;
                match call(target.clone()).await {
                    Ok(Outcome::Done(value)) => Step::Terminate(Ok(value)),
                    Ok(Outcome::Miss) => Step::EvictOnMiss { target },
                    Err(e) => Step::Terminate(Err(e)),
                }
            }
            Step::EvictOnMiss { target } => {
                evict(target.clone());
                counter!("link_location_evictions_total").increment(1);
                if attempts < MAX_ATTEMPTS {
                    Step::Resolve {
                        previous: Some(target),
                    }
                } else {
                    Step::Terminate(Err(Error::NotFoundSession))
                }
            }
            Step::Terminate(result) => return result,
        };
    }
}
