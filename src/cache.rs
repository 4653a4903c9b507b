// Throttled cache - bounds how often the node inventory is fetched
//
// Running the scheduler CLI is expensive, and several scrapes can arrive at
// once. The cache makes sure at most one fetch runs at a time and that fetches
// happen no more often than the configured minimum interval, handing out the
// last payload to everybody else.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::fetcher::{FetchError, Fetcher};

/// How the cache trades freshness against load on the data source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Minimum time between two fetch attempts, successful or not
    pub min_interval: Duration,

    /// Whether the last good payload is served, marked stale, when the latest
    /// fetch failed. When false, a failure is reported to every caller until
    /// the next successful fetch.
    pub serve_stale_on_error: bool,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        ThrottlePolicy {
            min_interval: Duration::from_secs(10),
            serve_stale_on_error: false,
        }
    }
}

/// A payload handed out by the cache
#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub bytes: Arc<[u8]>,
    /// Set when `bytes` stand in for a fetch that failed
    pub stale: bool,
}

impl CachedPayload {
    fn fresh(bytes: &Arc<[u8]>) -> Self {
        CachedPayload {
            bytes: Arc::clone(bytes),
            stale: false,
        }
    }

    fn stale(bytes: &Arc<[u8]>) -> Self {
        CachedPayload {
            bytes: Arc::clone(bytes),
            stale: true,
        }
    }
}

#[derive(Default)]
struct CacheState {
    payload: Option<Arc<[u8]>>,
    last_attempt: Option<Instant>,
    last_error: Option<String>,
}

/// Single-flight, rate-limited front for a [`Fetcher`].
///
/// The state lock is held for the whole duration of a fetch, so concurrent
/// callers queue behind the in-flight fetch and then find its result inside
/// the throttle window instead of starting another one.
pub struct ThrottledCache {
    fetcher: Box<dyn Fetcher>,
    policy: ThrottlePolicy,
    state: Mutex<CacheState>,
}

impl ThrottledCache {
    pub fn new(fetcher: Box<dyn Fetcher>, policy: ThrottlePolicy) -> Self {
        ThrottledCache {
            fetcher,
            policy,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns the current node inventory payload
    ///
    /// Inside the throttle window this answers from the cache without touching
    /// the fetcher. Outside it, exactly one caller performs the fetch while the
    /// others wait for it.
    ///
    /// # Returns
    /// * `Ok(payload)` - Latest good payload; `stale` is set when the latest
    ///   fetch failed and the policy allows serving it anyway
    /// * `Err(FetchError)` - The fetch failed and no cached payload may be served
    pub async fn get(&self) -> Result<CachedPayload, FetchError> {
        let mut state = self.state.lock().await;

        if let Some(at) = state.last_attempt {
            if at.elapsed() < self.policy.min_interval {
                debug!(
                    age_ms = u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Serving node inventory from throttle window"
                );
                return self.cached(&state);
            }
        }

        state.last_attempt = Some(Instant::now());
        match self.fetcher.fetch().await {
            Ok(bytes) => {
                let payload: Arc<[u8]> = Arc::from(bytes);
                state.payload = Some(Arc::clone(&payload));
                state.last_error = None;
                Ok(CachedPayload::fresh(&payload))
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
                match &state.payload {
                    Some(stale) if self.policy.serve_stale_on_error => {
                        warn!("Fetch failed, serving last good node inventory: {}", e);
                        Ok(CachedPayload::stale(stale))
                    }
                    _ => Err(e),
                }
            }
        }
    }

    fn cached(&self, state: &CacheState) -> Result<CachedPayload, FetchError> {
        match (&state.last_error, &state.payload) {
            (None, Some(payload)) => Ok(CachedPayload::fresh(payload)),
            (Some(_), Some(payload)) if self.policy.serve_stale_on_error => {
                Ok(CachedPayload::stale(payload))
            }
            (Some(last_error), _) => Err(FetchError::Throttled {
                last_error: last_error.clone(),
            }),
            (None, None) => Err(FetchError::Throttled {
                last_error: "no payload fetched yet".to_string(),
            }),
        }
    }
}
