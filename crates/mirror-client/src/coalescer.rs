//! Single-flight request coalescing.
//!
//! At most one request per key is in flight; concurrent callers await the same shared
//! result. A forced call always starts a fresh request and takes over the slot, so later
//! non-forced callers join the fresh one. Every request gets a generation number, which
//! lets the consumer discard a result that was overtaken by a newer one.

use futures::future::{BoxFuture, FutureExt, Shared};
use mirror_core::api::{ApiError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Flight<V> {
    generation: u64,
    future: SharedFetch<V>,
}

/// Result of a coalesced request, tagged with the generation that produced it.
#[derive(Debug, Clone)]
pub struct Fetched<V> {
    pub generation: u64,
    pub result: Result<V>,
}

pub struct RequestCoalescer<K, V> {
    inflight: Mutex<HashMap<K, Flight<V>>>,
    generation: AtomicU64,
}

impl<K, V> Default for RequestCoalescer<K, V> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key`, or join the request already in flight for it.
    ///
    /// `fetch` is only invoked when a new request is started.
    pub async fn run<F, Fut>(&self, key: K, forced: bool, fetch: F) -> Fetched<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (generation, future) = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.get(&key) {
                Some(flight) if !forced => {
                    debug!("Joining in-flight request for {:?}", key);
                    (flight.generation, flight.future.clone())
                }
                _ => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = fetch().boxed().shared();
                    inflight.insert(
                        key.clone(),
                        Flight {
                            generation,
                            future: future.clone(),
                        },
                    );
                    (generation, future)
                }
            }
        };

        let result = future.await;

        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if inflight
            .get(&key)
            .is_some_and(|flight| flight.generation == generation)
        {
            inflight.remove(&key);
        }

        Fetched { generation, result }
    }

    /// Number of keys with a request in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Run `attempt`, and once more after `delay` if it fails.
///
/// `attempt` is invoked afresh for the retry, so anything it derives (such as the
/// endpoint of a repository selected in the meantime) is re-evaluated.
pub async fn retry_once<T, F, Fut>(delay: Duration, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match attempt().await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Request failed ({}), retrying in {:?}", e, delay);
            tokio::time::sleep(delay).await;
            attempt().await
        }
    }
}

/// Map an elapsed timeout onto [`ApiError::Timeout`].
pub async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counted_fetch(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<usize>> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(n)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_request() {
        let coalescer = RequestCoalescer::<&str, usize>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(100);

        let (a, b, c) = tokio::join!(
            coalescer.run("recent", false, counted_fetch(&calls, delay)),
            coalescer.run("recent", false, counted_fetch(&calls, delay)),
            coalescer.run("recent", false, counted_fetch(&calls, delay)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.result, Ok(1));
        assert_eq!(b.result, Ok(1));
        assert_eq!(c.generation, a.generation);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_call_bypasses_in_flight_request() {
        let coalescer = RequestCoalescer::<&str, usize>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(100);

        let (plain, forced) = tokio::join!(
            coalescer.run("recent", false, counted_fetch(&calls, delay)),
            coalescer.run("recent", true, counted_fetch(&calls, delay)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(forced.generation > plain.generation);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_calls_start_new_requests() {
        let coalescer = RequestCoalescer::<&str, usize>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = coalescer
            .run("recent", false, counted_fetch(&calls, Duration::ZERO))
            .await;
        let second = coalescer
            .run("recent", false, counted_fetch(&calls, Duration::ZERO))
            .await;

        assert_eq!(first.result, Ok(1));
        assert_eq!(second.result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_once_recovers_on_second_attempt() {
        let attempts = AtomicUsize::new(0);
        let result = retry_once(Duration::from_secs(1), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ApiError::NoContext)
                } else {
                    Ok("fresh")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("fresh"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_once_gives_up_after_second_failure() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = retry_once(Duration::from_secs(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Status(500)) }
        })
        .await;

        assert_eq!(result, Err(ApiError::Status(500)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_elapsed() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(ApiError::Timeout));
    }
}
